// pulp-charge firmware entry point
//
// Boot sequence: logger -> clocks -> RTOS -> board -> bootstrap -> tasks
//
// Bootstrap runs inline before anything is spawned: a deeply discharged
// cell has to clear its gates before the rest of the system draws
// current. After that the charge task owns the controller and ticks it
// every 100ms; main only reports the published status.

#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};

use pulp_charge::board::{BoardHal, ChargerPins};
use pulp_charge::charger::ChargeController;
use pulp_charge::charger::bootstrap::BootstrapOutcome;
use pulp_charge::config::ChargeConfiguration;
use pulp_charge::drivers::adc::Calibration;
use pulp_charge::events::ChannelSink;
use pulp_charge::kernel::scheduler::ChargeScheduler;
use pulp_charge::kernel::snapshot::CHARGE_STATUS;
use pulp_charge::kernel::tasks::{CHARGE_EVENTS, charge_task, event_log_task};

esp_bootloader_esp_idf::esp_app_desc!();

const STATUS_INTERVAL_S: u64 = 30;

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let p = esp_hal::init(config);
    // esp-rtos task stacks
    esp_alloc::heap_allocator!(size: 32768);

    let timg0 = TimerGroup::new(p.TIMG0);
    let sw_int = SoftwareInterruptControl::new(p.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);
    info!("booting...");

    let hal = BoardHal::new(ChargerPins {
        adc: p.ADC1,
        battery: p.GPIO0,
        dc5v: p.GPIO1,
        prog: p.GPIO2,
        ntc: p.GPIO3,
        ntc_ref: p.GPIO4,
        charger_en: p.GPIO5,
        dc5v_detect: p.GPIO6,
        power_hold: p.GPIO7,
    });
    info!("hardware initialized.");

    let controller = match ChargeController::new(
        hal,
        ChannelSink::new(&CHARGE_EVENTS),
        ChargeConfiguration::defaults(),
        Calibration::default(),
    ) {
        Ok(c) => c,
        Err(e) => panic!("charge configuration: {}", e),
    };
    let mut sched = ChargeScheduler::new(controller, Delay::new()).with_status(&CHARGE_STATUS);

    match sched.enable() {
        BootstrapOutcome::Skipped => info!("bootstrap: not needed"),
        BootstrapOutcome::Completed { voltage_mv } => {
            info!("bootstrap: cell recovered at {}mV", voltage_mv)
        }
        // the rail is already gone or the chip is resetting
        outcome => warn!("bootstrap: {:?}", outcome),
    }

    if let Err(e) = spawner.spawn(charge_task(sched)) {
        error!("spawn charge task: {:?}", e);
    }
    if let Err(e) = spawner.spawn(event_log_task()) {
        error!("spawn event log task: {:?}", e);
    }

    loop {
        Timer::after(Duration::from_secs(STATUS_INTERVAL_S)).await;
        let s = CHARGE_STATUS.get();
        info!(
            "status: {} {}% {}mV dc5v={:?} exists={}",
            s.state, s.percent, s.voltage_mv, s.dc5v, s.exists
        );
        if s.low_battery {
            warn!("status: battery low");
        }
    }
}
