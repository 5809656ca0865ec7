//! Device selection
//!
//! [`DeviceSelector`] resolves the device a session runs on:
//!
//! ```text
//! Idle -> Enumerating -> Resolved | AwaitingUserChoice | LaunchFlow -> Selected
//! ```
//!
//! Precedence: explicit device id, then explicit index, then a single
//! connected device, then an interactive choice, and with nothing connected
//! the launch flow. `Selected` always holds a connected device.

use std::io::{BufRead, Write};
use std::sync::Arc;

use devrig_core::prelude::*;
use devrig_core::{Device, Platform};
use devrig_driver::avds;
use devrig_driver::{DeviceCatalog, DeviceLauncher, ToolAvailability};

use crate::config::SelectorSettings;
use crate::device_config::{recommended_device, AvdProfile, ANDROID_VERSIONS, IOS_VERSIONS};

pub const WSL_NO_EMULATOR_MESSAGE: &str =
    "No running emulator found. Start an emulator manually and try again.";
pub const NO_LAUNCHABLE_DEVICES_MESSAGE: &str =
    "No devices available. To proceed, either install Android SDK or Xcode.";

/// What the caller asked for; all fields optional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub device_id: Option<String>,
    pub platform: Option<Platform>,
    /// 0-based index into the platform-filtered connected list
    pub device_index: Option<usize>,
}

impl SelectionCriteria {
    pub fn device_id(id: impl Into<String>) -> Self {
        Self {
            device_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorState {
    Idle,
    Enumerating,
    Resolved(Device),
    AwaitingUserChoice(Vec<Device>),
    LaunchFlow,
    Selected(Device),
}

// ─────────────────────────────────────────────────────────────────
// Device source
// ─────────────────────────────────────────────────────────────────

/// Where the selector gets devices from and how it starts them
#[trait_variant::make(DeviceSource: Send)]
pub trait LocalDeviceSource {
    async fn connected(&self, filter: Option<Platform>) -> Vec<Device>;

    async fn available_for_launch(&self, filter: Option<Platform>) -> Vec<Device>;

    /// Start an `AvailableForLaunch` device
    async fn start(&self, device: &Device) -> Result<Device>;

    /// Installed Android hardware profiles; empty when unknown
    async fn hardware_profiles(&self) -> Vec<AvdProfile>;
}

/// [`DeviceSource`] over a [`DeviceCatalog`] and a [`DeviceLauncher`]
#[derive(Clone)]
pub struct CatalogSource {
    catalog: DeviceCatalog,
    launcher: Arc<dyn DeviceLauncher>,
    tools: Option<ToolAvailability>,
}

impl CatalogSource {
    pub fn new(catalog: DeviceCatalog, launcher: Arc<dyn DeviceLauncher>) -> Self {
        Self {
            catalog,
            launcher,
            tools: None,
        }
    }

    /// Look up hardware profiles with the SDK tools
    pub fn with_tools(mut self, tools: ToolAvailability) -> Self {
        self.tools = Some(tools);
        self
    }
}

impl DeviceSource for CatalogSource {
    async fn connected(&self, filter: Option<Platform>) -> Vec<Device> {
        self.catalog.list_connected(filter).await
    }

    async fn available_for_launch(&self, filter: Option<Platform>) -> Vec<Device> {
        self.catalog.list_available_for_launch(filter).await
    }

    async fn start(&self, device: &Device) -> Result<Device> {
        self.launcher.start(device).await
    }

    async fn hardware_profiles(&self) -> Vec<AvdProfile> {
        let Some(tools) = &self.tools else {
            return Vec::new();
        };
        match avds::list_hardware_profiles(tools).await {
            Ok(profiles) => profiles,
            Err(e) => {
                debug!("Hardware profiles unavailable: {}", e);
                Vec::new()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Console view
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchChoice {
    Recommended,
    ListExisting,
    Quit,
}

/// Line-based prompts over any reader and writer
pub struct ConsoleView<R, W> {
    input: R,
    output: W,
}

impl ConsoleView<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleView<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Read one trimmed line; `None` at end of input
    fn read_line(&mut self) -> Result<Option<String>> {
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Print devices grouped by platform and numbered across groups from 1
    ///
    /// Returns the devices in printed order.
    pub fn print_devices(&mut self, devices: &[Device]) -> Result<Vec<Device>> {
        let mut platforms: Vec<Platform> = Vec::new();
        for device in devices {
            if !platforms.contains(&device.platform) {
                platforms.push(device.platform);
            }
        }

        let mut ordered = Vec::with_capacity(devices.len());
        for platform in platforms {
            writeln!(self.output, "{}", platform.description())?;
            writeln!(self.output)?;
            for device in devices.iter().filter(|d| d.platform == platform) {
                ordered.push(device.clone());
                writeln!(self.output, "[{}] {}", ordered.len(), device.display_name())?;
            }
            writeln!(self.output)?;
        }
        Ok(ordered)
    }

    /// Prompt until a number in `1..=count` is entered; returns it 0-based
    pub fn pick_index(&mut self, count: usize) -> Result<usize> {
        loop {
            writeln!(self.output, "Enter a number from the list above:")?;
            let Some(line) = self.read_line()? else {
                return Err(Error::SelectionCancelled);
            };
            match line.parse::<usize>() {
                Ok(n) if (1..=count).contains(&n) => return Ok(n - 1),
                _ => writeln!(self.output, "Invalid selection '{}'", line)?,
            }
        }
    }

    pub fn pick_device(&mut self, heading: &str, devices: &[Device]) -> Result<Device> {
        writeln!(self.output, "{}", heading)?;
        writeln!(self.output)?;
        let ordered = self.print_devices(devices)?;
        let index = self.pick_index(ordered.len())?;
        Ok(ordered[index].clone())
    }

    pub fn launch_menu(&mut self) -> Result<LaunchChoice> {
        writeln!(
            self.output,
            "No running devices found. Launch a device manually or select a number from the options below:"
        )?;
        writeln!(self.output)?;
        writeln!(self.output, "[1] Start or create a recommended device")?;
        writeln!(self.output, "[2] List existing devices")?;
        writeln!(self.output, "[3] Quit")?;
        writeln!(self.output)?;
        writeln!(self.output, "Enter a number from the list above:")?;

        Ok(match self.read_line()?.as_deref() {
            Some("1") => LaunchChoice::Recommended,
            Some("2") => LaunchChoice::ListExisting,
            _ => LaunchChoice::Quit,
        })
    }

    pub fn pick_platform(&mut self) -> Result<Platform> {
        writeln!(self.output, "Please specify a device platform [android, ios, web]:")?;
        let line = self.read_line()?.ok_or(Error::SelectionCancelled)?;
        match line.parse::<Platform>()? {
            Platform::AutomationHub => Err(Error::selection(format!(
                "Unsupported platform '{}'. Use one of: android, ios, web",
                line
            ))),
            platform => Ok(platform),
        }
    }

    /// Prompt for an OS version; ENTER keeps `default`
    pub fn pick_version(&mut self, platform: Platform, supported: &[u32], default: u32) -> Result<u32> {
        let listed = supported
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        loop {
            writeln!(
                self.output,
                "Please specify {} version [{}]: Press ENTER for default ({})",
                platform.description(),
                listed,
                default
            )?;
            let Some(line) = self.read_line()? else {
                return Err(Error::SelectionCancelled);
            };
            if line.is_empty() {
                return Ok(default);
            }
            match line.parse::<u32>() {
                Ok(v) if supported.contains(&v) => return Ok(v),
                _ => writeln!(self.output, "Unsupported version '{}'", line)?,
            }
        }
    }

    pub fn launching(&mut self, device: &Device) -> Result<()> {
        writeln!(self.output, "Launching {}", device.description)?;
        Ok(())
    }

    pub fn running_on(&mut self, device: &Device) -> Result<()> {
        writeln!(self.output, "Running on {}", device.description)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Selector
// ─────────────────────────────────────────────────────────────────

pub struct DeviceSelector<S> {
    source: S,
    settings: SelectorSettings,
    wsl: bool,
    state: SelectorState,
}

impl<S: DeviceSource> DeviceSelector<S> {
    pub fn new(source: S, settings: SelectorSettings) -> Self {
        Self {
            source,
            settings,
            wsl: devrig_driver::is_wsl(),
            state: SelectorState::Idle,
        }
    }

    /// Override WSL detection
    pub fn with_wsl(mut self, wsl: bool) -> Self {
        self.wsl = wsl;
        self
    }

    pub fn state(&self) -> &SelectorState {
        &self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Resolve `criteria` to a connected device, prompting on `view` if needed
    pub async fn select<R: BufRead, W: Write>(
        &mut self,
        criteria: &SelectionCriteria,
        view: &mut ConsoleView<R, W>,
    ) -> Result<Device> {
        self.state = SelectorState::Enumerating;

        let device = match self.resolve(criteria, view).await {
            Ok(device) => device,
            Err(e) => {
                self.state = SelectorState::Idle;
                return Err(e);
            }
        };

        view.running_on(&device)?;
        self.state = SelectorState::Selected(device.clone());
        Ok(device)
    }

    async fn resolve<R: BufRead, W: Write>(
        &mut self,
        criteria: &SelectionCriteria,
        view: &mut ConsoleView<R, W>,
    ) -> Result<Device> {
        if let Some(id) = criteria.device_id.as_deref() {
            let device = self.find_by_id(id).await?;
            self.state = SelectorState::Resolved(device.clone());
            return Ok(device);
        }

        if criteria.platform == Some(Platform::Web) {
            let device = Device::browser();
            self.state = SelectorState::Resolved(device.clone());
            return Ok(device);
        }

        let connected = self.source.connected(criteria.platform).await;
        debug!("{} connected devices match {:?}", connected.len(), criteria.platform);

        if let Some(index) = criteria.device_index {
            let device = connected.get(index).cloned().ok_or_else(|| {
                Error::selection(format!(
                    "Device index {} is out of range ({} connected)",
                    index,
                    connected.len()
                ))
            })?;
            self.state = SelectorState::Resolved(device.clone());
            return Ok(device);
        }

        match connected.len() {
            0 => {
                self.state = SelectorState::LaunchFlow;
                let descriptor = self.launch_flow(criteria.platform, view).await?;
                self.start_and_verify(&descriptor, view).await
            }
            1 => {
                let device = connected[0].clone();
                self.state = SelectorState::Resolved(device.clone());
                Ok(device)
            }
            _ => {
                self.state = SelectorState::AwaitingUserChoice(connected.clone());
                view.pick_device(
                    "Multiple running devices detected. Choose a device to run on.",
                    &connected,
                )
            }
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Device> {
        let browser = Device::browser();
        if browser.matches_id(id) {
            return Ok(browser);
        }

        self.source
            .connected(None)
            .await
            .into_iter()
            .find(|d| d.matches_id(id))
            .ok_or_else(|| Error::device_not_found(id.trim()))
    }

    /// The launch flow with nothing connected
    ///
    /// Returns the device descriptor to start; it is not started here.
    pub async fn launch_flow<R: BufRead, W: Write>(
        &mut self,
        platform: Option<Platform>,
        view: &mut ConsoleView<R, W>,
    ) -> Result<Device> {
        self.state = SelectorState::LaunchFlow;

        if self.wsl {
            return Err(Error::selection(WSL_NO_EMULATOR_MESSAGE));
        }

        match view.launch_menu()? {
            LaunchChoice::Recommended => {
                let platform = match platform {
                    Some(platform) => platform,
                    None => view.pick_platform()?,
                };
                let version = match platform {
                    Platform::Android => view.pick_version(
                        platform,
                        &ANDROID_VERSIONS,
                        self.settings.android_version,
                    )?,
                    Platform::Ios => {
                        view.pick_version(platform, &IOS_VERSIONS, self.settings.ios_version)?
                    }
                    _ => 0,
                };
                let profiles = match platform {
                    Platform::Android => self.source.hardware_profiles().await,
                    _ => Vec::new(),
                };
                let (device, create_command) = recommended_device(platform, version, &profiles)?;
                if let Some(command) = create_command {
                    info!("Recommended device {} can be created with: {}", device.instance_id, command);
                }
                Ok(device)
            }
            LaunchChoice::ListExisting => {
                let available = self.source.available_for_launch(platform).await;
                if available.is_empty() {
                    return Err(Error::selection(NO_LAUNCHABLE_DEVICES_MESSAGE));
                }
                view.pick_device("Choose a device to boot and run on.", &available)
            }
            LaunchChoice::Quit => Err(Error::SelectionCancelled),
        }
    }

    /// Start `descriptor` and confirm it shows up as connected
    async fn start_and_verify<R: BufRead, W: Write>(
        &self,
        descriptor: &Device,
        view: &mut ConsoleView<R, W>,
    ) -> Result<Device> {
        if descriptor.is_connected() {
            return Ok(descriptor.clone());
        }

        view.launching(descriptor)?;
        let started = self.source.start(descriptor).await?;

        self.source
            .connected(Some(started.platform))
            .await
            .into_iter()
            .find(|d| d.matches_id(&started.instance_id))
            .ok_or_else(|| Error::device_not_connected(&descriptor.description))
    }
}
