//! HTTP surface over the Service Facade.

mod facade;
mod http;

pub use facade::{
    Artifacts, CancelResponse, Costs, EventView, EventsPageResponse, Progress, RunResultResponse,
    RunStatusResponse, RunSummary, SectionSummary, ServiceFacade, StartRunRequest, StartRunResponse, Timing,
};
pub use http::{router, serve, AppState};
