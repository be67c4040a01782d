/// Frame extraction from multi-page image stacks
pub mod frames;
