pub mod calibration;
pub mod mistake;
pub mod signal;
pub mod success;

pub use calibration::CalibrationMetrics;
pub use mistake::{error_profile, mistake_quality, ErrorProfile, MistakeQuality};
pub use signal::classify_signal;
pub use success::{blend_mastery, calibrate_difficulty, sigmoid, success_probability};
