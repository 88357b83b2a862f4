pub mod adapter_delegate;
pub mod device_engine;
