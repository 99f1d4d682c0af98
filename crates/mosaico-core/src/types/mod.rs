mod time;
pub use time::*;

mod format;
pub use format::*;

mod resources;
pub use resources::*;

mod value;
pub use value::*;

mod platform;
pub use platform::*;
