//! Data models
//!
//! This module contains the data structures used throughout the NCO portal:
//! - Database entities (User, NcoCode, SearchHistory, Dataset, AuditLog, ...)
//! - Input and filter types consumed by the services
//! - Aggregates returned by the analytics queries

mod analytics;
mod audit;
mod dataset;
mod nco_code;
mod pagination;
mod search;
mod system_config;
mod user;

pub use analytics::{
    DailySearchStat, EngagementUser, FeedbackAnalytics, PerformanceMetrics, Period, PopularCode,
    QueryCount, RecentComment, SearchAnalytics, SearchAnalyticsFilter, SearchTrends, StatusCount,
    UserEngagement, ValueCount,
};
pub use audit::{
    ApiRequest, ApiRequestFilter, ApiRequestStatus, AuditLog, AuditLogFilter, AuditLogWithUser,
    AuditMark, NewApiRequest, NewAuditLog, RequestContext,
};
pub use dataset::{
    CreateDatasetInput, CreatorSummary, DataRecord, DataRecordFilter, Dataset, DatasetFilter,
    DatasetStatus, DatasetType, DatasetWithMeta, NewDataRecord, UpdateDatasetInput,
};
pub use nco_code::{
    is_valid_nco_code, CreateNcoCodeInput, HierarchyGroup, HierarchyLevel, NcoCode,
    NcoCodeFilter, NcoCodeWithCounts, UpdateNcoCodeInput, DEFAULT_NCO_VERSION,
};
pub use pagination::{ListParams, PagedResult};
pub use search::{
    clamp_rating, AiServiceStatus, CodeSummary, FeedbackInput, FeedbackSummary, InputMethod,
    MatchType, NewSearch, NewSearchResult, SearchFeedback, SearchHistory, SearchHistoryEntry,
    SearchResult, TopResult,
};
pub use system_config::{ConfigDataType, SystemConfig, UpsertConfigInput};
pub use user::{UpdateProfileInput, User, UserFilter, UserRole, UserWithCounts};
