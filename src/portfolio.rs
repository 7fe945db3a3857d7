//! # Portfolio
//!
//! $$
//! \sigma_p^2 = \mathbf{w}^\top \Sigma \mathbf{w},\qquad
//! S = \frac{\mu^\top \mathbf{w} - r_f}{\sigma_p}
//! $$
//!
//! Long-only mean-variance allocation over the assets of a price table.

pub mod metrics;
pub mod optimizer;
pub mod qp;
pub mod types;

pub use metrics::mean_historical_return;
pub use metrics::sample_cov;
pub use optimizer::PortfolioOptimizer;
pub use types::equal_weights;
pub use types::MarketMetrics;
pub use types::Objective;
pub use types::PortfolioResult;
pub use types::WeightVector;
