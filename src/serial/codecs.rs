/// Orientation samples from an IMU, one per line.
pub mod imu;
