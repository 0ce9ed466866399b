pub mod artifact;
pub mod config;
pub mod error;
pub mod fleet;
pub mod grpc;
pub mod node;
pub mod ports;
pub mod shutdown;
pub mod store;
pub mod tunnel;
pub mod worker;

// Re-export generated protobuf types
pub mod proto {
    tonic::include_proto!("fleet");
}
