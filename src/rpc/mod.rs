//! XML-RPC access to the arm controller

pub mod client;
pub mod xmlrpc;

#[cfg(test)]
pub mod mock;

pub use client::RpcClient;
pub use xmlrpc::RpcValue;
