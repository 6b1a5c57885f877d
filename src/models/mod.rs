pub mod activity;
pub mod drive;
pub mod folder;
pub mod metadata;
pub mod settings;
pub mod share;
pub mod user;

pub use activity::*;
pub use drive::*;
pub use folder::*;
pub use metadata::*;
pub use settings::*;
pub use share::*;
pub use user::*;
