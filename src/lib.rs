pub mod backing;
pub mod ffi;
pub mod hybrid;
pub mod sim;
pub mod timeq;
