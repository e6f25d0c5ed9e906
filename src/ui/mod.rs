pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{error, header, info, record_line, section, success, summary_row, warn};
pub use progress::Spinner;
pub use table::{collection_table, CollectionRow};
pub use theme::{theme, Theme};
