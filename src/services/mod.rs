//! Services layer - Business logic
//!
//! Services implement the portal's rules on top of the repositories:
//! accounts and tokens, occupation search against the external matcher,
//! NCO code administration, datasets, analytics and auditing.

pub mod analytics;
pub mod audit;
pub mod dataset;
pub mod job_search;
pub mod matcher;
pub mod nco_code;
pub mod password;
pub mod system_config;
pub mod token;
pub mod user;

pub use analytics::{AnalyticsService, AnalyticsServiceError, EngagementViewer};
pub use audit::{AuditAction, AuditService};
pub use dataset::{DatasetService, DatasetServiceError};
pub use job_search::{JobSearchService, JobServiceError, SearchInput};
pub use matcher::{HttpMatcherClient, MatcherClient, MatcherError, MatcherHit};
pub use nco_code::{NcoCodeService, NcoCodeServiceError};
pub use password::{hash_password, verify_password};
pub use system_config::{SystemConfigService, SystemConfigServiceError};
pub use token::{Claims, TokenService};
pub use user::{LoginInput, RegisterInput, UserService, UserServiceError};
