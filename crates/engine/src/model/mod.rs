//! Domain types shared by every component
//!
//! - [`Event`] / [`NewEvent`] for inbound business events
//! - [`WorkflowDefinition`] with its [`WorkflowTrigger`] and [`Step`]s
//! - [`WorkflowRun`] / [`WorkflowJob`] with [`RunStatus`] / [`JobStatus`]
//! - business settings, recipes, enrollments and CRM records

mod business;
mod event;
mod run;
mod workflow;

pub use business::{
    AutomationSettings, Business, Collection, Enrollment, EnrollmentCondition, EnrollmentPolicy,
    Recipe, Record, DEFAULT_INDUSTRY,
};
pub use event::{Event, NewEvent, DEFAULT_EVENT_SOURCE};
pub use run::{JobStatus, RunStatus, WorkflowJob, WorkflowRun};
pub use workflow::{Step, WorkflowDefinition, WorkflowTrigger, ANY_INTENT};
