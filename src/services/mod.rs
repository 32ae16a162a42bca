// External HTTP services

pub mod node_invoice;
