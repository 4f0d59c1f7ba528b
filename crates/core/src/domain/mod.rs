pub mod approver;
pub mod attachment;
pub mod member;
pub mod request;
pub mod response;
