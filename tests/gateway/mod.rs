pub mod connection_tests;
pub mod dispatch_tests;
