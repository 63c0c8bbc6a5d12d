#![deny(unsafe_code)]
#![deny(warnings)]
#![no_main]
#![no_std]

use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

use node_core::time::SystemClock;

mod bkpsram;
mod sensor;
mod standby;
mod uplink;

stm32_tim2_monotonic!(Mono, 1_000_000);

/// Milliseconds since boot, incremented by SysTick
static CLOCK: SystemClock = SystemClock::new();

const SYSCLK_HZ: u32 = 84_000_000;

const TOPIC: &str = "feather-stm32f405/sensors";

/// Pull-up settling time before the reset pin is sampled
const RESET_SETTLE_MS: u32 = 50;

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1])]
mod app {
    use super::*;
    use cortex_m::peripheral::syst::SystClkSource;
    use defmt::{error, info, warn};
    use embassy_stm32::adc::Adc;
    use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
    use embassy_stm32::rcc::{Hse, HseMode, LsConfig, LseConfig, LseMode};
    use embassy_stm32::rtc::{Rtc, RtcConfig};
    use embassy_stm32::time::Hertz;
    use hal_abstractions::Platform;
    use node_core::lpm::{PersistentSleepConfig, PersistentSleepEngine};
    use node_core::node::{NodeConfig, SensorNode, SleepMemory};
    use node_core::storage::BlobStore;

    use crate::bkpsram::BackupSram;
    use crate::sensor::McuTemperature;
    use crate::standby::{Reboot, Standby};
    use crate::uplink::{NoUpdateServer, RttPublisher};

    type Engine = PersistentSleepEngine<&'static SystemClock, BackupSram, Standby>;

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        engine: Engine,
        config_store: BlobStore<BackupSram>,
        temperature: McuTemperature,
        reset_pin: Input<'static>,
        led: Output<'static>,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        info!("Sensor node starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE, 32.768 kHz LSE (PC14/PC15)
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        // LSE clocks the RTC, which times standby
        config.rcc.ls = LsConfig {
            rtc: embassy_stm32::rcc::RtcClockSource::LSE,
            lsi: false,
            lse: Some(LseConfig {
                frequency: Hertz(32_768),
                mode: LseMode::Oscillator(embassy_stm32::rcc::LseDrive::MediumHigh),
            }),
        };

        let p = embassy_stm32::init(config);

        // TIM2 on APB1: timer clock = 2*APB1 = 84 MHz
        Mono::start(SYSCLK_HZ);

        // SysTick at 1 kHz drives CLOCK
        let mut syst = cx.core.SYST;
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(SYSCLK_HZ / 1_000 - 1);
        syst.clear_current();
        syst.enable_interrupt();
        syst.enable_counter();

        let rtc = Rtc::new(p.RTC, RtcConfig::default());
        let Some(regions) = bkpsram::take() else {
            defmt::panic!("Backup SRAM regions already taken");
        };

        let engine = PersistentSleepEngine::new(
            PersistentSleepConfig::default(),
            &CLOCK,
            regions.lpm,
            Standby::new(cx.core.SCB, rtc),
        );
        info!(
            "Persistent sleep ready, {} bytes for sleep memory",
            engine.max_data_size()
        );

        let led = Output::new(p.PC1, Level::High, Speed::Low);
        // A0, pulled up; hold low at boot to drop persisted state
        let reset_pin = Input::new(p.PA4, Pull::Up);
        let temperature = McuTemperature::new(Adc::new(p.ADC1));

        cycle::spawn().ok();

        (
            Shared {},
            Local {
                engine,
                config_store: BlobStore::new(regions.config, 0),
                temperature,
                reset_pin,
                led,
            },
        )
    }

    #[task(binds = SysTick, priority = 2)]
    fn tick(_cx: tick::Context) {
        CLOCK.on_tick();
    }

    /// One wake period: resume check, publish, sleep
    #[task(priority = 1, local = [engine, config_store, temperature, reset_pin, led])]
    async fn cycle(cx: cycle::Context) {
        Mono::delay(RESET_SETTLE_MS.millis()).await;

        if cx.local.reset_pin.is_low() {
            warn!("Reset pin low: clearing stored configuration");
            if let Err(e) = cx.local.config_store.reset() {
                error!("Configuration reset failed: {}", e);
            }
        }

        // Continues an unfinished countdown without returning
        let mut memory = [0u8; SleepMemory::SIZE];
        if !cx.local.engine.check(cx.local.reset_pin, Some(&mut memory)) {
            info!("No persisted state, cold boot");
        }

        let config = NodeConfig::load(cx.local.config_store);
        let mut node = SensorNode::new(config, TOPIC, &CLOCK, SleepMemory::decode(&memory));

        let report = node.run_cycle(
            &mut [&mut *cx.local.temperature],
            &mut RttPublisher,
            &mut NoUpdateServer,
        );
        info!("Cycle done: {}", report);

        cx.local.led.set_low();
        if let Err(e) = node.sleep_preserving(cx.local.engine) {
            error!("Could not enter persistent sleep: {}", e);
        }

        // Only reached when sleep failed
        Mono::delay(config.retry_period_ms.millis()).await;
        Reboot.restart()
    }

    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
}
