//! Rolling image upgrades across the tenant fleet
//!
//! A campaign queues one execution per active tenant on a release channel.
//! An external driver pulls batches with [`UpgradeCampaignScheduler::get_next_batch`]
//! and reports progress back; too many failures halt the campaign.

pub mod errors;
pub mod handlers;
pub mod scheduler;

pub use errors::UpgradeError;
pub use handlers::{configure_routes, UpgradesApiDoc, UpgradesAppState};
pub use scheduler::{
    BatchItem, CampaignSummary, NewCampaign, NextBatch, UpgradeCampaignScheduler,
    DEFAULT_BATCH_SIZE, DEFAULT_FAILURE_THRESHOLD_PERCENT,
};
