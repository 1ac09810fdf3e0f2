//! Session engine for spectrophotometer and colorimeter instruments.
//!
//! The crate manages one instrument attachment at a time: communications
//! bring-up, capability and mode negotiation, calibration, measurement and the
//! translation of device error codes into a stable error taxonomy.
//!
//! - [`adapters`] - byte transports (serial, mock)
//! - [`hardware`] - model-specific device backends and their profiles
//! - [`instrument`] - the session engine
//! - [`config`] - figment-based configuration
//! - [`logging`] - tracing subscriber setup
//!
//! ```no_run
//! use rust_spectro::adapters::MockTransport;
//! use rust_spectro::config::DriverConfig;
//! use rust_spectro::hardware::FrameProtocolBackend;
//! use rust_spectro::instrument::{CalCondition, CalTarget, Illumination, ModeRequest, Session, SubMode};
//!
//! # async fn run() -> rust_spectro::error::InstResult<()> {
//! let config = DriverConfig::default();
//! let (transport, _handle) = MockTransport::new();
//! let backend = FrameProtocolBackend::new(config.profile());
//! let mut session = Session::new(Box::new(transport), Box::new(backend), &config);
//!
//! session.connect().await?;
//! session.initialize().await?;
//! session
//!     .set_mode(ModeRequest::spectral(Illumination::Reflection, SubMode::Spot))
//!     .await?;
//!
//! let mut condition = CalCondition::None;
//! while let Err(e) = session.calibrate(CalTarget::AllNeeded, &mut condition, "tile-1").await {
//!     if e.category != rust_spectro::instrument::ErrorCategory::CalSetupRequired {
//!         return Err(e);
//!     }
//!     // ask the user to arrange `condition`
//! }
//! let reading = session.read_sample("PATCH01").await?;
//! println!("{:?}", reading.spectrum);
//! session.close().await
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod logging;

pub use config::DriverConfig;
pub use error::{InstError, InstResult};
pub use instrument::Session;
