pub mod params;
pub mod schema;
pub mod target;

pub use params::{ParamDef, Params};
pub use schema::{
    BrowserConfig, Columns, Config, DetailFieldSelectors, DetailLayout, ListLayout, OnFailure,
    OutputConfig, RunConfig, TargetUrl, Viewport, Widen,
};
pub use target::Target;
