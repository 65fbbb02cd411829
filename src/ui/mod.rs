pub mod plain_renderer;
pub mod renderer;
pub mod style;
pub mod table;
pub mod widgets;

pub use plain_renderer::PlainRenderer;
pub use renderer::{Renderer, UiError, UiResult};
pub use style::OutputMode;
pub use widgets::{KeyValue, MessageBlock, TableSpec};
