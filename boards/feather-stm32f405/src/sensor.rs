//! On-chip temperature sensor
//!
//! Datasheet typicals: 0.76 V at 25 °C, 2.5 mV/°C. Good for a few degrees,
//! enough to have something real in the published payload.

use embassy_stm32::adc::{Adc, SampleTime, Temperature};
use embassy_stm32::peripherals::ADC1;
use hal_abstractions::{Quantity, Reading, Sensor, SensorError};

const VREF_MV: i32 = 3_300;
const FULL_SCALE: i32 = 4_095;
const V25_MV: i32 = 760;

pub struct McuTemperature {
    adc: Adc<'static, ADC1>,
    channel: Temperature,
}

impl McuTemperature {
    pub fn new(mut adc: Adc<'static, ADC1>) -> Self {
        // Sensor needs >= 10 us sampling
        adc.set_sample_time(SampleTime::CYCLES480);
        let channel = adc.enable_temperature();
        Self { adc, channel }
    }
}

impl Sensor for McuTemperature {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let raw = self.adc.blocking_read(&mut self.channel) as i32;
        if raw == 0 || raw >= FULL_SCALE {
            return Err(SensorError::InvalidData);
        }
        let millivolts = raw * VREF_MV / FULL_SCALE;
        // (mV - V25) / 2.5 mV/°C + 25 °C, in hundredths
        let centi = (millivolts - V25_MV) * 40 + 2_500;
        Ok(Reading::new(Quantity::Temperature, centi))
    }
}
