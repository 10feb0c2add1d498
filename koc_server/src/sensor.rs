use std::time::Duration;

use koc_common::{transport::PushSocket, Error, Packet, PacketHeader, SensorFrame};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hardware::{FrameSource, HardwareError};

const CAPTURE_BACKOFF: Duration = Duration::from_millis(100);

/// Captures paired video and depth frames and pushes them to the aggregator.
///
/// Capturing blocks, so [`SensorStream::run`] belongs on a blocking thread.
pub struct SensorStream {
    source: Box<dyn FrameSource>,
    sequence: u64,
}

impl SensorStream {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            sequence: 0,
        }
    }

    pub fn capture(&mut self) -> Result<SensorFrame, HardwareError> {
        let video = self.source.capture_video()?;
        let depth = self.source.capture_depth()?;
        self.sequence += 1;
        Ok(SensorFrame {
            header: PacketHeader::new(self.sequence),
            video,
            depth,
            tilt_state: self.source.tilt_state(),
            tilt_degrees: self.source.tilt_degrees(),
        })
    }

    pub fn run(mut self, sensor: PushSocket, cancel: CancellationToken) {
        info!("Sensor stream started");
        while !cancel.is_cancelled() {
            let frame = match self.capture() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Error capturing sensor frame: {e}");
                    std::thread::sleep(CAPTURE_BACKOFF);
                    continue;
                }
            };
            let encoded = match Packet::from(frame).encode() {
                Ok(encoded) => encoded,
                Err(e) => {
                    warn!("{e}");
                    continue;
                }
            };
            match sensor.send(encoded) {
                Ok(()) => {}
                Err(Error::Full) => debug!("Sensor frame {} dropped", self.sequence),
                Err(e) => {
                    warn!("Sensor channel closed: {e}");
                    break;
                }
            }
        }
        self.source.release();
        info!("Sensor stream stopped");
    }
}
