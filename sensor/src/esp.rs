use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::{
    http::Method,
    io::Write,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    delay::Ets,
    gpio::{
        ADCPin, AnyIOPin, AnyOutputPin, Gpio32, Gpio33, Gpio34, Gpio35, IOPin, InputOutput,
        Output, OutputPin, PinDriver, Pull,
    },
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use one_wire_bus::{Address, OneWire};

use envmon_common::{
    CalibrationConfig, NetworkConfig, ReadingSnapshot, RuntimeConfig, SensorSample,
};

const ONE_WIRE_PIN_A: i32 = 4;
const ONE_WIRE_PIN_B: i32 = 16;
const MQ135_PIN: i32 = 32;
const MQ4_PIN: i32 = 33;
const HUMIDITY1_PIN: i32 = 34;
const HUMIDITY2_PIN: i32 = 35;
const STATUS_LED_PIN: i32 = 2;

const STATUS_LED_PULSE_MS: u64 = 50;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;

/// One DS18B20 probe on its own one-wire bus.
///
/// The first device with the DS18B20 family code found on the bus is cached;
/// any read fault drops the cached address so the next read rescans.
struct TempProbe {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    address: Option<Address>,
    gpio: i32,
    delay: Ets,
}

impl TempProbe {
    fn new(pin: AnyIOPin, gpio: i32) -> anyhow::Result<Self> {
        let mut bus_pin = PinDriver::input_output_od(pin)?;
        bus_pin.set_pull(Pull::Up)?;
        bus_pin.set_high()?;

        let one_wire = OneWire::new(bus_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus on GPIO{gpio}: {err:?}"))?;

        let mut probe = Self {
            one_wire,
            address: None,
            gpio,
            delay: Ets,
        };

        probe.refresh_address();
        Ok(probe)
    }

    fn refresh_address(&mut self) {
        let mut first_ds18: Option<Address> = None;
        let mut device_count = 0_u32;

        for addr in self.one_wire.devices(false, &mut self.delay) {
            match addr {
                Ok(address) => {
                    device_count = device_count.saturating_add(1);
                    if first_ds18.is_none() && address.family_code() == ds18b20::FAMILY_CODE {
                        first_ds18 = Some(address);
                    }
                }
                Err(err) => {
                    warn!("one-wire scan failed on GPIO{}: {err:?}", self.gpio);
                    break;
                }
            }
        }

        self.address = first_ds18;

        if let Some(address) = self.address {
            info!(
                "DS18B20 ready on GPIO{} ({} one-wire device(s), using {:?})",
                self.gpio, device_count, address
            );
        } else {
            warn!(
                "no DS18B20 found on GPIO{} ({} one-wire device(s) detected)",
                self.gpio, device_count
            );
        }
    }

    fn read_temperature_c(&mut self) -> Option<f32> {
        if self.address.is_none() {
            self.refresh_address();
        }

        let address = self.address?;
        let sensor = match Ds18b20::new::<core::convert::Infallible>(address) {
            Ok(sensor) => sensor,
            Err(err) => {
                warn!(
                    "invalid DS18B20 address {:?} on GPIO{}: {err:?}",
                    address, self.gpio
                );
                self.address = None;
                return None;
            }
        };

        if let Err(err) =
            ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
        {
            warn!(
                "failed to start DS18B20 conversion on GPIO{}: {err:?}",
                self.gpio
            );
            self.address = None;
            return None;
        }

        Resolution::Bits12.delay_for_measurement_time(&mut self.delay);

        match sensor.read_data(&mut self.one_wire, &mut self.delay) {
            Ok(data) => {
                info!("[DS18B20] GPIO{}: {:.1}°C", self.gpio, data.temperature);
                Some(data.temperature)
            }
            Err(err) => {
                warn!("failed to read DS18B20 on GPIO{}: {err:?}", self.gpio);
                self.address = None;
                None
            }
        }
    }
}

/// The four analog channels on ADC1. Channel drivers are built per read over
/// the stored pins; the handles stay owned here for the program lifetime.
struct AnalogInputs {
    adc: AdcDriver<'static, ADC1>,
    mq1_pin: Gpio32,
    mq2_pin: Gpio33,
    humidity1_pin: Gpio34,
    humidity2_pin: Gpio35,
}

impl AnalogInputs {
    fn new(
        adc1: ADC1,
        mq1_pin: Gpio32,
        mq2_pin: Gpio33,
        humidity1_pin: Gpio34,
        humidity2_pin: Gpio35,
    ) -> anyhow::Result<Self> {
        let adc = AdcDriver::new(adc1)?;
        info!(
            "analog inputs ready (MQ135 on GPIO{MQ135_PIN}, MQ4 on GPIO{MQ4_PIN}, \
             humidity on GPIO{HUMIDITY1_PIN}/GPIO{HUMIDITY2_PIN})"
        );

        Ok(Self {
            adc,
            mq1_pin,
            mq2_pin,
            humidity1_pin,
            humidity2_pin,
        })
    }
}

/// Raw sample from one ADC channel; a read fault degrades to 0 after a warning.
fn read_channel<P: ADCPin<Adc = ADC1>>(
    adc: &AdcDriver<'static, ADC1>,
    pin: &mut P,
    label: &str,
) -> u16 {
    let config = AdcChannelConfig {
        attenuation: DB_11,
        ..Default::default()
    };

    let result = AdcChannelDriver::new(adc, &mut *pin, &config)
        .and_then(|mut channel| adc.read_raw(&mut channel));

    match result {
        Ok(raw) => raw,
        Err(err) => {
            warn!("failed to read {label} ADC channel: {err}");
            0
        }
    }
}

struct SensorSuite {
    probe_a: TempProbe,
    probe_b: TempProbe,
    analog: AnalogInputs,
}

impl SensorSuite {
    fn new(
        one_wire_a: AnyIOPin,
        one_wire_b: AnyIOPin,
        adc1: ADC1,
        mq1_pin: Gpio32,
        mq2_pin: Gpio33,
        humidity1_pin: Gpio34,
        humidity2_pin: Gpio35,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            probe_a: TempProbe::new(one_wire_a, ONE_WIRE_PIN_A)?,
            probe_b: TempProbe::new(one_wire_b, ONE_WIRE_PIN_B)?,
            analog: AnalogInputs::new(adc1, mq1_pin, mq2_pin, humidity1_pin, humidity2_pin)?,
        })
    }

    fn read(&mut self) -> SensorSample {
        let analog = &mut self.analog;

        SensorSample {
            temp1_c: self.probe_a.read_temperature_c(),
            temp2_c: self.probe_b.read_temperature_c(),
            mq1_raw: read_channel(&analog.adc, &mut analog.mq1_pin, "MQ135"),
            mq2_raw: read_channel(&analog.adc, &mut analog.mq2_pin, "MQ4"),
            humidity1_raw: read_channel(&analog.adc, &mut analog.humidity1_pin, "humidity 1"),
            humidity2_raw: read_channel(&analog.adc, &mut analog.humidity2_pin, "humidity 2"),
        }
    }
}

struct StatusLed {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl StatusLed {
    fn new(pin: AnyOutputPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::output(pin)?;
        pin.set_low()?;
        Ok(Self { pin })
    }

    /// Brief blink acknowledging a served request.
    fn pulse(&mut self) {
        if let Err(err) = self.pin.set_high() {
            warn!("failed to raise status LED on GPIO{STATUS_LED_PIN}: {err}");
            return;
        }
        thread::sleep(Duration::from_millis(STATUS_LED_PULSE_MS));
        if let Err(err) = self.pin.set_low() {
            warn!("failed to lower status LED on GPIO{STATUS_LED_PIN}: {err}");
        }
    }
}

struct DeviceState {
    sensors: SensorSuite,
    led: StatusLed,
    calibration: CalibrationConfig,
}

impl DeviceState {
    fn snapshot(&mut self) -> ReadingSnapshot {
        let sample = self.sensors.read();
        ReadingSnapshot::build(&sample, &self.calibration, uptime_ms())
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = RuntimeConfig::default();
    ensure_wifi_defaults(&mut runtime.network);
    runtime
        .calibration
        .validate()
        .context("invalid analog calibration")?;

    let Peripherals {
        modem, pins, adc1, ..
    } = Peripherals::take()?;

    let sensors = SensorSuite::new(
        pins.gpio4.downgrade(),
        pins.gpio16.downgrade(),
        adc1,
        pins.gpio32,
        pins.gpio33,
        pins.gpio34,
        pins.gpio35,
    )
    .context("failed to initialize sensor suite")?;

    let led = StatusLed::new(pins.gpio2.downgrade_output())
        .context("failed to initialize status LED")?;

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;
    disable_wifi_power_save();

    let state = Arc::new(Mutex::new(DeviceState {
        sensors,
        led,
        calibration: runtime.calibration,
    }));
    let server = create_http_server(state)?;

    info!("snapshot endpoint ready on /data");

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn create_http_server(state: Arc<Mutex<DeviceState>>) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/data", Method::Get, move |req| {
        let mut device = state.lock().unwrap();
        let snapshot = device.snapshot();
        let body = serde_json::to_vec(&snapshot)?;

        req.into_response(
            200,
            Some("OK"),
            &[("Content-Type", "application/json; charset=utf-8")],
        )?
        .write_all(&body)?;

        device.led.pulse();
        Ok(())
    })?;

    Ok(server)
}

fn ensure_wifi_defaults(network: &mut NetworkConfig) {
    if network.wifi_ssid.is_empty() {
        network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }

    if network.wifi_pass.is_empty() {
        network.wifi_pass = option_env!("WIFI_PASS").unwrap_or("CHANGE_ME").to_string();
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    // The device is useless without the network; keep trying until associated.
    let mut attempt = 0_u32;
    loop {
        attempt = attempt.saturating_add(1);
        match wifi.connect() {
            Ok(()) => match wifi.wait_netif_up() {
                Ok(()) => {
                    info!("wifi connected and netif up on attempt {attempt}");
                    break;
                }
                Err(err) => warn!("wifi netif up failed on attempt {attempt}: {err:#}"),
            },
            Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        let _ = wifi.disconnect();
        thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
    }

    Ok(esp_wifi)
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

/// Milliseconds since boot, from the monotonic high-resolution timer.
fn uptime_ms() -> u64 {
    (unsafe { esp_idf_svc::sys::esp_timer_get_time() } / 1000) as u64
}
