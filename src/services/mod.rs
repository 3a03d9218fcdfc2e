//! 服务模块

pub mod created_at;
pub mod reconstruction;
pub mod temporal_query;

pub use created_at::{CreatedAtResolver, resolve_in};
pub use reconstruction::{Reconstruction, ReconstructionRequest, TemporalEntityReconstructor};
pub use temporal_query::{
    TemporalEntityResult, TemporalQueryParams, TemporalQueryResult, TemporalQueryService,
    create_temporal_query_service,
};
