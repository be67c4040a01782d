//! Restoration model and its training machinery

/// Model directory handling, training loop and prediction
pub mod care;
/// Persisted hyperparameters
pub mod config;
/// Per-epoch metric history
pub mod history;
/// Loss functions and their gradients
pub mod loss;
/// Convolutional filter network
pub mod network;
/// Adam optimizer and learning rate schedule
pub mod optimizer;
