pub mod admin;
pub mod live_stream;
pub mod session;
pub mod signup;
