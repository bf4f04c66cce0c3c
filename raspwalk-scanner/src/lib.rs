pub mod crawler;
pub mod error;
pub mod event;
pub mod links;
pub mod recovery;
pub mod result;
pub mod schedule;
pub mod surface;

pub use crawler::{Crawler, TraversalConfig, descend_on_markers};
pub use error::{ScanError, SurfaceError};
pub use event::{EventCallback, TraversalEvent};
pub use links::LinkDescriptor;
pub use recovery::RecoveryPolicy;
pub use result::{NavigationNode, NavigationOutcome, RecoveryOutcome, ScheduleRecord, ScheduleResult, ScheduleStatus, WeekScope, flatten};
pub use schedule::{ExtractorConfig, LayoutMode, RecordExtractor};
pub use surface::{HttpOptions, HttpPage, PageSurface, PageView};
#[cfg(feature = "browser")]
pub use surface::{BrowserOptions, BrowserPage};
