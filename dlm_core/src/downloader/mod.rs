pub mod http_range;
pub mod supervisor;
pub mod transfer_worker;
