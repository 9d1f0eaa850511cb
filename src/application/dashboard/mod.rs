pub mod builders;
pub mod dedup;
pub mod worker;

pub use builders::{assemble, render_chart, DashboardSources};
pub use dedup::{message_key, Deduplicated};
pub use worker::{
    DashboardDelivery, DashboardGenerationHandler, DashboardSaveWorker, DashboardWorker,
    DirectDashboardWorker, HandoffDashboardWorker, DASHBOARD_ADD_METHOD,
};
