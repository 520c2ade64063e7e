//! Funnel-stage statistics
//!
//! Each user has one row of boolean flags recording how far they got through
//! the sales funnel. Stages are an explicit enumeration; every stage maps to
//! exactly one column, so no write ever uses a caller-supplied field name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BillingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunnelStage {
    BotLaunch,
    MiniAppLinkClicked,
    LearnMoreButtonClicked,
    CourseButtonClicked,
    CoursePaid,
}

impl FunnelStage {
    pub const ALL: [FunnelStage; 5] = [
        FunnelStage::BotLaunch,
        FunnelStage::MiniAppLinkClicked,
        FunnelStage::LearnMoreButtonClicked,
        FunnelStage::CourseButtonClicked,
        FunnelStage::CoursePaid,
    ];

    /// Identifier used by clients
    pub fn as_str(&self) -> &'static str {
        match self {
            FunnelStage::BotLaunch => "botLaunch",
            FunnelStage::MiniAppLinkClicked => "miniAppLinkClicked",
            FunnelStage::LearnMoreButtonClicked => "learnMoreButtonClicked",
            FunnelStage::CourseButtonClicked => "courseButtonClicked",
            FunnelStage::CoursePaid => "coursePaid",
        }
    }

    /// Column in `user_statistics`
    pub(crate) fn column(&self) -> &'static str {
        match self {
            FunnelStage::BotLaunch => "bot_launch",
            FunnelStage::MiniAppLinkClicked => "mini_app_link_clicked",
            FunnelStage::LearnMoreButtonClicked => "learn_more_button_clicked",
            FunnelStage::CourseButtonClicked => "course_button_clicked",
            FunnelStage::CoursePaid => "course_paid",
        }
    }
}

impl fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunnelStage {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FunnelStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| BillingError::Validation(format!("Invalid stage: {}", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserStatistics {
    pub user_id: i64,
    pub bot_launch: bool,
    pub mini_app_link_clicked: bool,
    pub learn_more_button_clicked: bool,
    pub course_button_clicked: bool,
    pub course_paid: bool,
}

impl UserStatistics {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn get(&self, stage: FunnelStage) -> bool {
        match stage {
            FunnelStage::BotLaunch => self.bot_launch,
            FunnelStage::MiniAppLinkClicked => self.mini_app_link_clicked,
            FunnelStage::LearnMoreButtonClicked => self.learn_more_button_clicked,
            FunnelStage::CourseButtonClicked => self.course_button_clicked,
            FunnelStage::CoursePaid => self.course_paid,
        }
    }

    pub fn set(&mut self, stage: FunnelStage, value: bool) {
        let flag = match stage {
            FunnelStage::BotLaunch => &mut self.bot_launch,
            FunnelStage::MiniAppLinkClicked => &mut self.mini_app_link_clicked,
            FunnelStage::LearnMoreButtonClicked => &mut self.learn_more_button_clicked,
            FunnelStage::CourseButtonClicked => &mut self.course_button_clicked,
            FunnelStage::CoursePaid => &mut self.course_paid,
        };
        *flag = value;
    }
}

/// Result of a stage upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageUpdate {
    pub statistics: UserStatistics,
    /// True when the statistics row did not exist before this write
    pub created: bool,
}
