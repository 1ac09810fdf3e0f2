//! Instrument session.
//!
//! A [`Session`] is one live attachment to a physical instrument. It owns the
//! transport, the device backend, the negotiated mode, the capability sets
//! and the calibration record, and is the only thing that mutates them.
//!
//! Every operation takes `&mut self`, so at most one operation is in flight
//! per session. Operations that wait on the device or on the user race that
//! wait against the key inbox and return a classified user-interaction error
//! when a key ends it early.
//!
//! ```text
//! new ─► establish_comms ─► initialize ─► set_mode ─► calibrate ─► read_sample / read_strip
//!                                                                        │
//!                                         close ◄────────────────────────┘
//! ```

use crate::adapters::{CommsParams, PortSelector, Transport};
use crate::config::{DriverConfig, MeasurementConfig, SessionConfig};
use crate::error::{InstError, InstResult, TransportError};
use crate::hardware::{
    AcquisitionPlan, BackendError, BackendResult, DeviceBackend, DeviceInfo, Resolution,
};
use crate::instrument::calibration::{
    CalCondition, CalContext, CalNeed, CalStep, CalTarget, CalibrationPolicy, CalibrationRecord,
    CalibrationType,
};
use crate::instrument::capabilities::{Capabilities, CapabilitySet, ExtendedCapabilities};
use crate::instrument::codes::DeviceCode;
use crate::instrument::measurement::{
    self, PassInfo, PipelineSettings, Reading, SpectralConverter, Spectrum, StripGeometry,
};
use crate::instrument::mode::{self, DeviceMode, ModeRequest, OperatingMode};
use crate::instrument::options::{InstOption, SessionOptions, TriggerStyle};
use crate::instrument::trigger::{
    interruptible, wait_for_trigger, KeyInbox, TriggerError, TriggerSettings, UserKeys,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// The port, if comms are up.
fn link(
    port: &mut Option<Box<dyn Transport>>,
    comms: bool,
) -> InstResult<&mut (dyn Transport + 'static)> {
    match port.as_deref_mut() {
        Some(port) if comms => Ok(port),
        _ => Err(InstError::from_code(DeviceCode::INT_NO_COMS)),
    }
}

fn context(policy: &CalibrationPolicy, mode: DeviceMode, resolution: Resolution) -> CalContext<'_> {
    CalContext {
        mode,
        resolution,
        now: Instant::now(),
        policy,
    }
}

/// Read acquisition data until the plan is satisfied or the device goes quiet.
async fn receive_frames(
    port: &mut dyn Transport,
    plan: &AcquisitionPlan,
) -> Result<Vec<u8>, TransportError> {
    let expected = plan.expected_bytes();
    let mut buf = Vec::with_capacity(expected);
    while buf.len() < expected {
        match port.receive(expected - buf.len(), plan.timeout).await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => buf.extend_from_slice(&chunk),
            Err(TransportError::Timeout(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(buf)
}

/// One live attachment to an instrument.
pub struct Session {
    port: Option<Box<dyn Transport>>,
    backend: Box<dyn DeviceBackend>,
    converter: Option<Arc<dyn SpectralConverter>>,
    comms: bool,
    info: Option<DeviceInfo>,
    caps: Option<CapabilitySet>,
    mode: Option<OperatingMode>,
    options: SessionOptions,
    record: CalibrationRecord,
    policy: CalibrationPolicy,
    keys: KeyInbox,
    config: DriverConfig,
}

impl Session {
    /// Create a session over `transport`, driving the instrument with `backend`.
    ///
    /// Nothing is opened until [`Session::establish_comms`].
    pub fn new(
        transport: Box<dyn Transport>,
        backend: Box<dyn DeviceBackend>,
        config: &DriverConfig,
    ) -> Self {
        Self {
            port: Some(transport),
            backend,
            converter: None,
            comms: false,
            info: None,
            caps: None,
            mode: None,
            options: SessionOptions::from_config(&config.session),
            record: CalibrationRecord::new(),
            policy: CalibrationPolicy::from_config(&config.calibration),
            keys: KeyInbox::new(),
            config: config.clone(),
        }
    }

    /// Attach a spectral to colorimetric converter.
    pub fn with_converter(mut self, converter: Arc<dyn SpectralConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    fn session_config(&self) -> &SessionConfig {
        &self.config.session
    }

    fn measurement_config(&self) -> &MeasurementConfig {
        &self.config.measurement
    }

    /// Classify a backend failure, dropping comms when the link is gone.
    fn backend_error(&mut self, err: BackendError) -> InstError {
        match err {
            BackendError::Device(code) => InstError::from_code(code),
            BackendError::Transport(e) => {
                if e.is_link_loss() {
                    warn!("link to instrument lost: {}", e);
                    self.comms = false;
                }
                e.into_inst_error()
            }
        }
    }

    fn check<T>(&mut self, result: BackendResult<T>) -> InstResult<T> {
        result.map_err(|e| self.backend_error(e))
    }

    fn require_init(&self) -> InstResult<CapabilitySet> {
        if !self.comms {
            return Err(InstError::from_code(DeviceCode::INT_NO_COMS));
        }
        self.caps
            .ok_or_else(|| InstError::from_code(DeviceCode::INT_NOT_INITIALISED))
    }

    fn require_mode(&self) -> InstResult<OperatingMode> {
        self.require_init()?;
        self.mode
            .ok_or_else(|| InstError::with_detail(DeviceCode::INT_ILLEGALMODE, "no mode set"))
    }

    /// Mode for a reading. Without one nothing can be calibrated yet.
    fn require_read_mode(&self) -> InstResult<OperatingMode> {
        self.require_init()?;
        self.mode
            .ok_or_else(|| InstError::with_detail(DeviceCode::RD_NEEDS_CAL, "no mode set"))
    }

    /// Drop keys left over from before this operation started.
    fn discard_stale_keys(&mut self) {
        let stale = self.keys.clear();
        if stale > 0 {
            debug!("discarded {} keys pressed between operations", stale);
        }
    }

    /// Put the link back in step after an exchange was abandoned.
    async fn resync(&mut self) {
        let Ok(port) = link(&mut self.port, self.comms) else {
            return;
        };
        let result = self.backend.resync(port).await;
        if let Err(e) = result {
            let err = self.backend_error(e);
            warn!("resync after interruption failed: {}", err);
        }
    }

    // ========================================================================
    // Comms and bring-up
    // ========================================================================

    /// Open the transport on `selector`.
    ///
    /// The port is closed again on every failure path, so the call can simply
    /// be retried. An already-open port is released first.
    pub async fn establish_comms(
        &mut self,
        selector: &PortSelector,
        params: &CommsParams,
        timeout: Duration,
    ) -> InstResult<()> {
        let Some(port) = self.port.as_deref_mut() else {
            return Err(InstError::with_detail(
                DeviceCode::COMS_FAIL,
                "transport was lost, create a new session",
            ));
        };
        if port.is_open() {
            debug!("releasing {} before reopening", port.name());
            if let Err(e) = port.close().await {
                warn!("failed to close {}: {}", port.name(), e);
            }
        }
        self.comms = false;
        self.mode = None;

        info!("opening {} on {}", port.name(), selector);
        let identity = match port.open(selector, params, timeout).await {
            Ok(identity) => identity,
            Err(e) => {
                let _ = port.close().await;
                return Err(InstError::with_detail(DeviceCode::COMS_FAIL, e.to_string()));
            }
        };

        if !self.backend.accepts(&identity) {
            let _ = port.close().await;
            return Err(InstError::with_detail(
                DeviceCode::COMS_FAIL,
                format!(
                    "{} is not a {} instrument ({:04x?}:{:04x?} {})",
                    selector,
                    self.backend.name(),
                    identity.vendor_id,
                    identity.product_id,
                    identity.description
                ),
            ));
        }

        self.comms = true;
        info!("comms established on {}", selector);
        Ok(())
    }

    /// Open the transport using the `[comms]` configuration section.
    pub async fn connect(&mut self) -> InstResult<()> {
        let selector = self
            .config
            .port_selector()
            .map_err(|e| InstError::with_detail(DeviceCode::COMS_FAIL, e.to_string()))?;
        let params = self.config.comms_params();
        let timeout = self.config.open_timeout();
        self.establish_comms(&selector, &params, timeout).await
    }

    /// Bring the instrument up and compute its capabilities.
    ///
    /// Re-initialising resets the calibration record to `Unknown` and clears
    /// the mode. A failed attempt leaves the session uninitialised.
    pub async fn initialize(&mut self) -> InstResult<()> {
        let port = link(&mut self.port, self.comms)?;
        self.info = None;
        self.caps = None;
        self.mode = None;
        self.record = CalibrationRecord::new();

        let result = self.backend.init(port).await;
        let info = self.check(result)?;

        let caps = CapabilitySet::resolve(info.model, self.backend.features());
        info!(
            "{} initialised: primary {:?}, extended {:?}",
            info.model, caps.primary, caps.extended
        );

        self.info = Some(info);
        self.caps = Some(caps);
        self.options = SessionOptions::from_config(self.session_config());
        Ok(())
    }

    /// Whether comms are currently established.
    pub fn is_connected(&self) -> bool {
        self.comms
    }

    /// Identity learned at initialisation.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }

    /// Primary capabilities; empty before initialisation.
    pub fn capabilities(&self) -> Capabilities {
        self.caps.map(|c| c.primary).unwrap_or_default()
    }

    /// Extended capabilities; empty before initialisation.
    pub fn extended_capabilities(&self) -> ExtendedCapabilities {
        self.caps.map(|c| c.extended).unwrap_or_default()
    }

    /// Current operating mode.
    pub fn mode(&self) -> Option<OperatingMode> {
        self.mode
    }

    /// Current option values.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Read-only view of the calibration record.
    pub fn calibration_record(&self) -> &CalibrationRecord {
        &self.record
    }

    /// Handle for delivering user keys to this session.
    pub fn user_keys(&self) -> UserKeys {
        self.keys.handle()
    }

    // ========================================================================
    // Mode and options
    // ========================================================================

    /// Resolve and apply a measurement mode.
    pub async fn set_mode(&mut self, request: ModeRequest) -> InstResult<()> {
        let caps = self.require_init()?;
        let resolved = mode::resolve(request, &caps)?;
        if !resolved.spectral && self.converter.is_none() {
            return Err(InstError::with_detail(
                DeviceCode::UNSUPPORTED,
                "colorimetric output needs a spectral converter",
            ));
        }

        let port = link(&mut self.port, self.comms)?;
        let result = self.backend.configure_mode(port, resolved.device).await;
        self.check(result)?;

        self.mode = Some(resolved);
        let ctx = context(&self.policy, resolved.device, self.options.resolution);
        self.record.apply_mode(&ctx);
        info!("mode set to {} (spectral: {})", resolved.device, resolved.spectral);
        Ok(())
    }

    /// Change one option.
    pub async fn set_option(&mut self, option: InstOption) -> InstResult<()> {
        let caps = self.require_init()?;
        SessionOptions::check(&option, &caps)?;

        if let InstOption::Resolution(resolution) = option {
            let result = self.backend.set_resolution(resolution);
            self.check(result)?;
        }
        self.options.apply(option);
        debug!("option applied: {:?}", option);

        if let Some(mode) = self.mode {
            let ctx = context(&self.policy, mode.device, self.options.resolution);
            self.record.refresh(&ctx);
        }
        Ok(())
    }

    /// Parse and apply a textual option.
    pub async fn set_option_str(&mut self, name: &str, value: &str) -> InstResult<()> {
        let option = InstOption::parse(name, value)?;
        self.set_option(option).await
    }

    // ========================================================================
    // Calibration
    // ========================================================================

    /// What the current mode still needs. Never changes state.
    pub fn needs_calibration(&self) -> CalNeed {
        match (self.caps, self.mode) {
            (Some(_), Some(mode)) => self
                .record
                .needs(&context(&self.policy, mode.device, self.options.resolution)),
            _ => CalNeed::Unknown,
        }
    }

    /// Take one calibration reading and record the outcome.
    async fn perform_calibration(&mut self, cal: CalibrationType, mode: DeviceMode) -> InstResult<()> {
        info!("performing {} calibration", cal);
        let port = link(&mut self.port, self.comms)?;
        let outcome = interruptible(&mut self.keys, self.backend.calibrate(port, cal, mode)).await;
        let err = match outcome {
            Ok(Ok(())) => {
                self.record
                    .complete(cal, self.options.resolution, Instant::now());
                return Ok(());
            }
            Ok(Err(e)) => self.backend_error(e),
            Err(key) => {
                self.resync().await;
                key.into_error()
            }
        };
        warn!("{} calibration failed: {}", cal, err);
        self.record.fail(cal, &err);
        Err(err)
    }

    /// Run the calibrations `target` asks for.
    ///
    /// When the physical setup has to change, `condition` is set to the setup
    /// needed and a `cal_setup_required` error is returned; the caller
    /// arranges it and repeats the same call. On success the record becomes
    /// valid and is stamped with `id` (truncated to `CAL_ID_LEN - 1` bytes).
    pub async fn calibrate(
        &mut self,
        target: CalTarget,
        condition: &mut CalCondition,
        id: &str,
    ) -> InstResult<()> {
        let mode = self.require_mode()?;
        let caps = self.require_init()?;
        self.discard_stale_keys();
        let ctx = context(&self.policy, mode.device, self.options.resolution);
        let mut pending = self.record.plan(target, &ctx, caps.extended)?;
        debug!("calibration plan for {:?}: {:?}", target, pending);

        loop {
            match self.record.next_step(&pending, *condition) {
                CalStep::Done => break,
                CalStep::Setup(needed) => {
                    info!("calibration needs setup {:?}", needed);
                    *condition = needed;
                    return Err(InstError::with_detail(
                        DeviceCode::CAL_SETUP,
                        format!("place the instrument for {:?}", needed),
                    ));
                }
                CalStep::Perform(cal) => {
                    self.perform_calibration(cal, mode.device).await?;
                    pending.remove(0);
                }
            }
        }

        let ctx = context(&self.policy, mode.device, self.options.resolution);
        self.record.finish(id, &ctx);
        if self.session_config().debug {
            debug!("calibration record: {:?}", self.record.summary());
        }
        info!("calibration of {} finished: {:?}", mode.device, self.record.state());
        Ok(())
    }

    /// Make sure the mode's calibrations are valid, redoing silent ones when
    /// auto-calibration allows. Fails before any I/O otherwise.
    async fn ensure_calibrated(&mut self, mode: DeviceMode) -> InstResult<()> {
        let ctx = context(&self.policy, mode, self.options.resolution);
        let cal = match self.record.needs(&ctx) {
            CalNeed::None => return Ok(()),
            CalNeed::Needed(cal) => cal,
            CalNeed::Unknown => {
                return Err(InstError::from_code(DeviceCode::RD_NEEDS_CAL));
            }
        };

        let silent = if self.options.auto_calibrate {
            self.record.auto_recalibration(&ctx)
        } else {
            None
        };
        let Some(stale) = silent else {
            self.record.mark_needed(cal);
            return Err(InstError::with_detail(
                DeviceCode::RD_NEEDS_CAL,
                format!("{} calibration needed", cal),
            ));
        };

        info!("auto-calibrating {:?}", stale);
        for cal in stale {
            self.perform_calibration(cal, mode).await?;
        }
        let ctx = context(&self.policy, mode, self.options.resolution);
        self.record.refresh(&ctx);
        Ok(())
    }

    // ========================================================================
    // Measurement
    // ========================================================================

    async fn await_trigger(&mut self) -> InstResult<()> {
        let config = self.session_config();
        let settings = TriggerSettings {
            style: self.options.trigger,
            trigger_return: self.options.trigger_return,
            timeout: Duration::from_millis(config.trigger_timeout_ms),
            poll_interval: Duration::from_millis(config.switch_poll_ms),
        };
        let poller = self.backend.switch_poller();
        let outcome = wait_for_trigger(&mut self.keys, &mut self.port, poller, settings).await;
        if settings.style == TriggerStyle::KeyboardSwitch
            && matches!(outcome, Err(TriggerError::Key(_) | TriggerError::TimedOut))
        {
            // The poll may have been cut off after its request went out.
            self.resync().await;
        }
        match outcome {
            Ok(()) => Ok(()),
            Err(TriggerError::Key(key)) => Err(key.into_error()),
            Err(TriggerError::TimedOut) => Err(InstError::from_code(DeviceCode::INT_BUTTONTIMEOUT)),
            Err(TriggerError::Poll(e)) => Err(self.backend_error(e)),
            Err(TriggerError::TaskFailed) => {
                if self.port.is_none() {
                    self.comms = false;
                }
                Err(InstError::from_code(DeviceCode::INT_THREADFAILED))
            }
        }
    }

    fn pipeline_settings(&self) -> PipelineSettings {
        let config = self.measurement_config();
        PipelineSettings {
            limits: self.backend.limits(),
            spot_consistency: config.spot_consistency,
            scan_tolerance: config.scan_tolerance * self.options.scan_tolerance_ratio,
            min_patch_samples: self.backend.min_patch_samples(),
            flash_threshold: config.flash_threshold,
        }
    }

    /// Run one acquisition cycle and reduce it to one value set per patch.
    async fn acquire(&mut self, mode: DeviceMode, patches: usize) -> InstResult<Vec<Vec<f64>>> {
        let planned = self.backend.plan(mode, patches);
        let plan = self.check(planned)?;
        debug!(
            "acquiring {} frames of {} bytes in {}",
            plan.frames, plan.frame_size, mode
        );

        let backend = self.backend.as_mut();
        let port = link(&mut self.port, self.comms)?;
        let io = async move {
            backend.start_acquisition(port, &plan).await?;
            let bytes = receive_frames(port, &plan).await?;
            Ok::<_, BackendError>((plan, bytes))
        };
        let (plan, bytes) = match interruptible(&mut self.keys, io).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => return Err(self.backend_error(e)),
            Err(key) => {
                warn!("acquisition interrupted by {:?}", key);
                self.resync().await;
                return Err(key.into_error());
            }
        };

        if self.session_config().verbosity >= 2 {
            trace!("received {} bytes: {:02x?}", bytes.len(), bytes);
        }
        measurement::check_alignment(&plan, bytes.len()).map_err(InstError::from_code)?;
        let decoded = self.backend.decode(&plan, &bytes);
        let frames = self.check(decoded)?;
        debug!("decoded {} frames", frames.len());

        measurement::evaluate(&frames, mode, patches, &self.pipeline_settings())
            .map_err(InstError::from_code)
    }

    fn make_reading(
        &self,
        mode: OperatingMode,
        name: &str,
        index: usize,
        values: Vec<f64>,
        pass: Option<PassInfo>,
    ) -> InstResult<Reading> {
        let spectrum = Spectrum::new(&self.backend.bands(), values);
        let xyz = match &self.converter {
            Some(converter) => {
                let xyz = converter.to_xyz(&spectrum);
                if xyz.iter().any(|v| !v.is_finite()) {
                    return Err(InstError::from_code(DeviceCode::INT_CIECONVFAIL));
                }
                Some(xyz)
            }
            None => None,
        };
        Ok(Reading {
            name: name.to_string(),
            index,
            mode: mode.device,
            spectrum: mode.spectral.then_some(spectrum),
            xyz,
            pass,
            taken_at: Utc::now(),
        })
    }

    /// Measure one sample.
    pub async fn read_sample(&mut self, name: &str) -> InstResult<Reading> {
        let mode = self.require_read_mode()?;
        self.discard_stale_keys();
        self.ensure_calibrated(mode.device).await?;
        self.await_trigger().await?;

        let mut values = self.acquire(mode.device, 1).await?;
        let value = values
            .pop()
            .ok_or_else(|| InstError::from_code(DeviceCode::RD_SHORTMEAS))?;
        let reading = self.make_reading(mode, name, 0, value, None)?;
        self.record.note_reading(mode.device);
        info!("read sample '{}' in {}", name, mode.device);
        Ok(reading)
    }

    /// Measure a strip of `patch_count` patches in one pass.
    ///
    /// Either every patch yields a reading, in scan order, or the call fails.
    pub async fn read_strip(
        &mut self,
        strip_name: &str,
        patch_count: usize,
        pass_name: &str,
        guide: u32,
        geometry: StripGeometry,
    ) -> InstResult<Vec<Reading>> {
        let mode = self.require_read_mode()?;
        if !mode.device.is_scan() {
            return Err(InstError::with_detail(
                DeviceCode::UNSUPPORTED,
                format!("{} is not a strip mode", mode.device),
            ));
        }
        if patch_count == 0 {
            return Err(InstError::from_code(DeviceCode::INT_ZEROMEASURES));
        }
        self.discard_stale_keys();
        self.ensure_calibrated(mode.device).await?;
        self.await_trigger().await?;

        let values = self.acquire(mode.device, patch_count).await?;
        let pass = PassInfo {
            strip_name: strip_name.to_string(),
            pass_name: pass_name.to_string(),
            guide,
            geometry,
        };
        let readings = values
            .into_iter()
            .enumerate()
            .map(|(index, value)| self.make_reading(mode, strip_name, index, value, Some(pass.clone())))
            .collect::<InstResult<Vec<_>>>()?;
        self.record.note_reading(mode.device);
        info!(
            "read strip '{}' pass '{}': {} patches",
            strip_name,
            pass_name,
            readings.len()
        );
        Ok(readings)
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Release the instrument and the port. Repeated calls are no-ops.
    pub async fn close(&mut self) -> InstResult<()> {
        if let Some(port) = self.port.as_deref_mut() {
            if port.is_open() {
                if self.comms {
                    if let Err(e) = self.backend.shutdown(port).await {
                        warn!("instrument shutdown failed: {}", e);
                    }
                }
                if let Err(e) = port.close().await {
                    warn!("failed to close {}: {}", port.name(), e);
                }
                info!("session closed");
            }
        }
        self.comms = false;
        self.mode = None;
        Ok(())
    }
}
