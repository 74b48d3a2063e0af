mod edit;
mod generate;
mod image;
mod optimize;

pub use edit::EditStage;
pub use generate::GenerateStage;
pub use image::{ImageStage, MAX_IMAGES};
pub use optimize::OptimizeStage;
