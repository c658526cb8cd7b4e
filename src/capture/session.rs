//! Camera session ownership
//!
//! A `CameraSession` is the single owner of an opened camera for the length
//! of a run. Setup code creates it and lends the driver out by reference.

use super::traits::{CameraDriver, CameraInfo, CameraSystem};
use crate::utils::error::{AppError, AppResult};

pub struct CameraSession {
    info: CameraInfo,
    driver: Box<dyn CameraDriver>,
}

impl CameraSession {
    /// Open the camera at `index`, failing with `NoCameras` if none are
    /// connected
    pub fn open(system: &dyn CameraSystem, index: usize) -> AppResult<Self> {
        let cameras = system.cameras()?;
        tracing::info!("Number of cameras detected: {}", cameras.len());
        if cameras.is_empty() {
            return Err(AppError::NoCameras);
        }

        let info = cameras.get(index).cloned().ok_or_else(|| {
            AppError::Settings(format!(
                "camera index {} out of range ({} cameras)",
                index,
                cameras.len()
            ))
        })?;

        tracing::info!("Initializing camera {} ({})", info.id, info.name);
        let driver = system.open(index)?;

        Ok(Self { info, driver })
    }

    pub fn info(&self) -> &CameraInfo {
        &self.info
    }

    pub fn driver(&mut self) -> &mut dyn CameraDriver {
        self.driver.as_mut()
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        tracing::info!("Deinitializing camera {} ({})", self.info.id, self.info.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::simulated::{SimulatedConfig, SimulatedSystem};

    #[test]
    fn test_zero_cameras() {
        let system = SimulatedSystem::new(SimulatedConfig {
            camera_count: 0,
            ..SimulatedConfig::default()
        });
        assert!(matches!(CameraSession::open(&system, 0), Err(AppError::NoCameras)));
    }

    #[test]
    fn test_index_out_of_range() {
        let system = SimulatedSystem::new(SimulatedConfig::default());
        assert!(matches!(CameraSession::open(&system, 3), Err(AppError::Settings(_))));
    }

    #[test]
    fn test_open_first_camera() {
        let system = SimulatedSystem::new(SimulatedConfig {
            camera_count: 2,
            ..SimulatedConfig::default()
        });
        let mut session = CameraSession::open(&system, 0).unwrap();
        assert_eq!(session.info().id, "0");
        assert_eq!(session.driver().info().serial_number.as_deref(), Some("SIM00001"));
    }
}
