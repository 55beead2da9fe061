pub mod call;
pub mod crm;
