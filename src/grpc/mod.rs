pub mod server;

pub use server::GrpcServer;
