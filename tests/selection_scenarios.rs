//! Device selection scenarios across the catalog, selector and console view

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use devrig_app::config::SelectorSettings;
use devrig_app::device_config::AvdProfile;
use devrig_app::{CatalogSource, ConsoleView, DeviceSelector, DeviceSource, SelectionCriteria};
use devrig_core::{ConnectionState, Device, DeviceType, Error, Platform, Result};
use devrig_driver::test_utils::{android_device, ios_simulator, FakeLauncher, StaticProbe};
use devrig_driver::{DeviceCatalog, DeviceProbe};

type TestView = ConsoleView<Cursor<Vec<u8>>, Vec<u8>>;

fn console(input: &str) -> TestView {
    ConsoleView::new(Cursor::new(input.as_bytes().to_vec()), Vec::new())
}

fn selector_over(probe: Arc<StaticProbe>) -> DeviceSelector<CatalogSource> {
    let catalog = DeviceCatalog::new(vec![probe.clone() as Arc<dyn DeviceProbe>]);
    let source = CatalogSource::new(catalog, Arc::new(FakeLauncher::new(probe)));
    DeviceSelector::new(source, SelectorSettings::default()).with_wsl(false)
}

/// Source that counts how often each capability is used
#[derive(Default)]
struct RecordingSource {
    devices: Vec<Device>,
    profiles: Vec<AvdProfile>,
    connected_calls: AtomicUsize,
    launchable_calls: AtomicUsize,
    starts: AtomicUsize,
}

impl DeviceSource for RecordingSource {
    async fn connected(&self, _filter: Option<Platform>) -> Vec<Device> {
        self.connected_calls.fetch_add(1, Ordering::SeqCst);
        self.devices.clone()
    }

    async fn available_for_launch(&self, _filter: Option<Platform>) -> Vec<Device> {
        self.launchable_calls.fetch_add(1, Ordering::SeqCst);
        Vec::new()
    }

    async fn start(&self, device: &Device) -> Result<Device> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(device.clone())
    }

    async fn hardware_profiles(&self) -> Vec<AvdProfile> {
        self.profiles.clone()
    }
}

#[tokio::test]
async fn two_ios_simulators_user_enters_two() {
    let probe = Arc::new(StaticProbe::new(Platform::Ios).with_connected(vec![
        ios_simulator("11111111-AAAA", "iPhone 15"),
        ios_simulator("22222222-BBBB", "iPhone 15 Pro"),
    ]));
    let mut selector = selector_over(probe);
    let mut view = console("2\n");

    let device = selector
        .select(&SelectionCriteria::platform(Platform::Ios), &mut view)
        .await
        .unwrap();

    assert_eq!(device.instance_id, "22222222-BBBB");
    let printed = String::from_utf8(view.into_output()).unwrap();
    assert!(printed.contains("[1] iPhone 15 - iOS 17.2 - 11111111-AAAA"));
    assert!(printed.contains("[2] iPhone 15 Pro - iOS 17.2 - 22222222-BBBB"));
}

#[tokio::test]
async fn no_android_devices_create_recommended_with_default_version() {
    let mut selector = selector_over(Arc::new(StaticProbe::new(Platform::Android)));
    let mut view = console("1\n\n");

    let device = selector
        .launch_flow(Some(Platform::Android), &mut view)
        .await
        .unwrap();

    assert_eq!(device.platform, Platform::Android);
    assert_eq!(device.state, ConnectionState::AvailableForLaunch);
    assert_eq!(device.device_type, DeviceType::Emulator);
    assert_eq!(device.os_version, Some(30));
    assert_eq!(device.instance_id, "Devrig_Pixel_6_API_30");
}

#[tokio::test]
async fn explicit_id_bypasses_prompts_and_launch_flow() {
    let source = RecordingSource {
        devices: vec![android_device("emulator-5554"), android_device("emulator-5556")],
        ..Default::default()
    };
    let mut selector = DeviceSelector::new(source, SelectorSettings::default()).with_wsl(false);
    let mut view = console("");

    let device = selector
        .select(&SelectionCriteria::device_id("EMULATOR-5556"), &mut view)
        .await
        .unwrap();

    assert_eq!(device.instance_id, "emulator-5556");
    let source = selector.source();
    assert_eq!(source.connected_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.launchable_calls.load(Ordering::SeqCst), 0);
    assert_eq!(source.starts.load(Ordering::SeqCst), 0);

    let printed = String::from_utf8(view.into_output()).unwrap();
    assert!(!printed.contains("Enter a number"));
}

#[tokio::test]
async fn explicit_id_not_connected_names_the_id() {
    let source = RecordingSource {
        devices: vec![android_device("emulator-5554")],
        ..Default::default()
    };
    let mut selector = DeviceSelector::new(source, SelectorSettings::default()).with_wsl(false);

    let err = selector
        .select(&SelectionCriteria::device_id("R58M123ABC"), &mut console(""))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeviceNotFound { .. }));
    assert_eq!(err.to_string(), "Device with id R58M123ABC is not connected");
    assert_eq!(selector.source().launchable_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn single_matching_device_is_selected_without_prompt() {
    let source = RecordingSource {
        devices: vec![android_device("emulator-5554")],
        ..Default::default()
    };
    let mut selector = DeviceSelector::new(source, SelectorSettings::default()).with_wsl(false);
    let mut view = console("");

    let device = selector
        .select(&SelectionCriteria::platform(Platform::Android), &mut view)
        .await
        .unwrap();

    assert_eq!(device.instance_id, "emulator-5554");
    let printed = String::from_utf8(view.into_output()).unwrap();
    assert_eq!(printed, "Running on Android SDK built for x86\n");
}

#[tokio::test]
async fn launch_flow_recommends_installed_pixel_profile() {
    let source = RecordingSource {
        profiles: vec![
            AvdProfile::new("pixel_c", "Pixel C"),
            AvdProfile::new("pixel_5", "Pixel 5"),
        ],
        ..Default::default()
    };
    let mut selector = DeviceSelector::new(source, SelectorSettings::default()).with_wsl(false);
    let mut view = console("1\n\n");

    let device = selector
        .launch_flow(Some(Platform::Android), &mut view)
        .await
        .unwrap();

    assert_eq!(device.instance_id, "Devrig_Pixel_5_API_30");
    assert_eq!(device.state, ConnectionState::AvailableForLaunch);
    assert_eq!(selector.source().starts.load(Ordering::SeqCst), 0);
}
