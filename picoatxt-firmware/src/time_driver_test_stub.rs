extern crate std;
use core::task::Waker;
use embassy_time_driver::{AlarmHandle, Driver};
use embassy_time_queue_driver::TimerQueue;
use std::time::SystemTime;

/// Wall-clock time driver so `embassy_time` works on the host. The queue
/// wakes immediately; timer futures spin until their deadline passes, which
/// the wire simulations rely on for their real-microsecond windows.
pub(crate) struct TestTimeDriver;

impl Driver for TestTimeDriver {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_micros() as u64
    }
    unsafe fn allocate_alarm(&self) -> Option<AlarmHandle> {
        std::unimplemented!()
    }
    fn set_alarm_callback(&self, alarm: AlarmHandle, callback: fn(*mut ()), ctx: *mut ()) {
        let _ = (alarm, callback, ctx);
        std::unimplemented!()
    }
    fn set_alarm(&self, alarm: AlarmHandle, timestamp: u64) -> bool {
        let _ = (alarm, timestamp);
        std::unimplemented!()
    }
}

embassy_time_driver::time_driver_impl!(static TIME_DRIVER: TestTimeDriver = TestTimeDriver);

struct MyTimerQueue;

impl TimerQueue for MyTimerQueue {
    fn schedule_wake(&'static self, _at: u64, waker: &Waker) {
        let waker = waker.clone();
        waker.wake();
    }
}

embassy_time_queue_driver::timer_queue_impl!(static QUEUE: MyTimerQueue = MyTimerQueue);
