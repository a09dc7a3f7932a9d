pub mod manual_probe;

pub use manual_probe::ManualConnectivity;
