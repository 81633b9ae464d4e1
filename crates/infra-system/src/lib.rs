// Provisioning Infrastructure - System Adapters
// Implements: Worker (external command hook)

pub mod command_worker;

pub use command_worker::CommandWorker;
