// ── Domain model ──

pub mod device;
pub mod sensor;

pub use device::{
    DeviceDirectory, DeviceField, DeviceRecord, DeviceUpdate, DirectoryDiff,
    directory_from_entries,
};
pub use sensor::{LivenessRecord, LivenessStatus, SensorKey};
