use crate::packet::{CommandKind, CommandMessage, MotorState};

/// Speeds a command assigns to each motor. `None` leaves that motor as it was.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorTargets {
    pub left: Option<i32>,
    pub right: Option<i32>,
    pub turret: Option<i32>,
}

impl MotorTargets {
    fn drive(left: i32, right: i32) -> Self {
        Self {
            left: Some(left),
            right: Some(right),
            turret: None,
        }
    }

    fn turret(speed: i32) -> Self {
        Self {
            turret: Some(speed),
            ..Self::default()
        }
    }

    /// Writes the assigned speeds into the desired speed of each motor.
    pub fn apply(&self, left: &mut MotorState, right: &mut MotorState, turret: &mut MotorState) {
        if let Some(speed) = self.left {
            left.desired_speed = speed;
        }
        if let Some(speed) = self.right {
            right.desired_speed = speed;
        }
        if let Some(speed) = self.turret {
            turret.desired_speed = speed;
        }
    }
}

/// Maps a command onto the differential drive.
///
/// The left motor is mounted mirrored, so "forward" is negative on the left and
/// positive on the right. Drive commands never touch the turret and turret
/// commands never touch the wheels.
pub fn translate(command: &CommandMessage) -> MotorTargets {
    let v = i32::from(command.magnitude);
    match command.kind {
        CommandKind::GoForward => MotorTargets::drive(-v, v),
        CommandKind::GoBackward => MotorTargets::drive(v, -v),
        CommandKind::GoLeft => MotorTargets::drive(-(v / 2), v),
        CommandKind::GoRight => MotorTargets::drive(-v, v / 2),
        CommandKind::TurnLeft => MotorTargets::drive(-v, -v),
        CommandKind::TurnRight => MotorTargets::drive(v, v),
        CommandKind::TurretLeft => MotorTargets::turret(v),
        CommandKind::TurretRight => MotorTargets::turret(-v),
        CommandKind::TurretReset => MotorTargets::turret(0),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::MotorPort;

    fn expected(kind: CommandKind, v: i32) -> (Option<i32>, Option<i32>, Option<i32>) {
        match kind {
            CommandKind::GoForward => (Some(-v), Some(v), None),
            CommandKind::GoBackward => (Some(v), Some(-v), None),
            CommandKind::GoLeft => (Some(-(v / 2)), Some(v), None),
            CommandKind::GoRight => (Some(-v), Some(v / 2), None),
            CommandKind::TurnLeft => (Some(-v), Some(-v), None),
            CommandKind::TurnRight => (Some(v), Some(v), None),
            CommandKind::TurretLeft => (None, None, Some(v)),
            CommandKind::TurretRight => (None, None, Some(-v)),
            CommandKind::TurretReset => (None, None, Some(0)),
        }
    }

    #[test]
    fn every_command_and_magnitude_matches_table() {
        for kind in CommandKind::ALL {
            for v in 0..=u8::MAX {
                let command = CommandMessage::new(kind, v);
                let targets = translate(&command);
                let (left, right, turret) = expected(kind, i32::from(command.magnitude));
                assert_eq!(
                    (targets.left, targets.right, targets.turret),
                    (left, right, turret),
                    "{kind:?}({v})"
                );
            }
        }
    }

    #[test]
    fn half_speed_side_truncates() {
        assert_eq!(translate(&CommandMessage::go_left(101)).left, Some(-50));
        assert_eq!(translate(&CommandMessage::go_right(255)).right, Some(127));
        assert_eq!(translate(&CommandMessage::go_left(1)).left, Some(0));
    }

    #[test]
    fn drive_command_keeps_turret_moving() {
        let mut left = MotorState::new(MotorPort::A);
        let mut right = MotorState::new(MotorPort::D);
        let mut turret = MotorState::new(MotorPort::C);
        translate(&CommandMessage::turret_left(80)).apply(&mut left, &mut right, &mut turret);
        translate(&CommandMessage::go_forward(100)).apply(&mut left, &mut right, &mut turret);
        assert_eq!(left.desired_speed, -100);
        assert_eq!(right.desired_speed, 100);
        assert_eq!(turret.desired_speed, 80);

        translate(&CommandMessage::turret_reset()).apply(&mut left, &mut right, &mut turret);
        assert_eq!(turret.desired_speed, 0);
        assert_eq!(left.desired_speed, -100);
    }
}
