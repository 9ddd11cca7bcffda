pub mod client;
pub mod types;

pub use client::{ServerClient, Session};
pub use types::{
    AppState, ConfigReport, DaemonState, Event, EventList, Machine, MachineList, MachineState,
    ReportCollection, User,
};
