// Stablescope Engine — chain access, live feed, warehouse analytics and the
// JSON API that serves them.

pub mod chain;
pub mod feed;
pub mod http;
pub mod insights;
pub mod providers;
pub mod reports;
pub mod server;
pub mod state;
pub mod warehouse;
