mod bounds;
pub use self::bounds::*;
