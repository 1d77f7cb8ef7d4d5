pub mod baselines;
pub mod features;
pub mod health_monitor;
pub mod orchestrator;
pub mod system;
pub mod training_queue;
pub mod window_loader;
