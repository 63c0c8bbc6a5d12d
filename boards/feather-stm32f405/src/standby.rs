//! Standby mode as the destructive sleep
//!
//! Standby drops SRAM and every register outside the backup domain; the
//! RTC wakeup timer ends it with a reset. What has to survive lives in
//! backup SRAM (see [`crate::bkpsram`]).
//!
//! Wakeup clock selection:
//! - up to 32 s: RTCCLK / 16 (2048 Hz from the LSE), ~0.5 ms steps
//! - longer: the 1 Hz calendar clock, rounded up to whole seconds

use cortex_m::peripheral::SCB;
use defmt::{debug, info};
use embassy_stm32::pac;
use embassy_stm32::pac::pwr::vals::Pdds;
use embassy_stm32::pac::rtc::vals::Wucksel;
use embassy_stm32::rtc::Rtc;
use hal_abstractions::{DeepSleep, Platform, RadioMode};

const FAST_WAKEUP_HZ: u64 = 32_768 / 16;

/// Wakeup timer reload register width
const MAX_WAKEUP_TICKS: u64 = 1 << 16;

pub struct Standby {
    scb: SCB,
    // Owns the RTC so nothing else reconfigures its clock
    _rtc: Rtc,
}

impl Standby {
    pub fn new(scb: SCB, rtc: Rtc) -> Self {
        Self { scb, _rtc: rtc }
    }

    fn arm_wakeup(duration_ms: u32) {
        let (clock, reload) = wakeup_setting(duration_ms);
        let rtc = pac::RTC;

        rtc.wpr().write(|w| w.set_key(0xCA));
        rtc.wpr().write(|w| w.set_key(0x53));

        rtc.cr().modify(|w| w.set_wute(false));
        while !rtc.isr().read().wutwf() {}
        rtc.cr().modify(|w| w.set_wucksel(clock));
        rtc.wutr().write(|w| w.set_wut(reload));
        // A stale flag would end standby right away
        rtc.isr().modify(|w| w.set_wutf(false));
        rtc.cr().modify(|w| {
            w.set_wutie(true);
            w.set_wute(true);
        });

        rtc.wpr().write(|w| w.set_key(0xFF));
    }
}

/// Wakeup clock and reload value (ticks - 1) for `duration_ms`.
fn wakeup_setting(duration_ms: u32) -> (Wucksel, u16) {
    let fast_ticks = (duration_ms as u64 * FAST_WAKEUP_HZ / 1000).max(1);
    if fast_ticks <= MAX_WAKEUP_TICKS {
        return (Wucksel::DIV16, (fast_ticks - 1) as u16);
    }
    let secs = (duration_ms as u64).div_ceil(1000).min(MAX_WAKEUP_TICKS);
    (Wucksel::CLOCKSPARE, (secs - 1) as u16)
}

impl DeepSleep for Standby {
    fn deep_sleep(&mut self, duration_ms: u32, radio: RadioMode) -> ! {
        // No radio on this board; the Ethernet wing loses power with VDD
        debug!("Radio mode {} ignored", radio);
        info!("Entering standby for {} ms", duration_ms);

        Self::arm_wakeup(duration_ms);

        pac::PWR.cr1().modify(|w| {
            w.set_pdds(Pdds::STANDBY_MODE);
            w.set_cwuf(true);
        });
        self.scb.set_sleepdeep();
        cortex_m::asm::dsb();

        loop {
            cortex_m::asm::wfi();
        }
    }
}

/// System reset through the NVIC
pub struct Reboot;

impl Platform for Reboot {
    fn restart(&mut self) -> ! {
        info!("Restarting");
        SCB::sys_reset()
    }
}
