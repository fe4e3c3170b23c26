//! 입력 이벤트 옵저버 등록
//!
//! 클래스 드라이버는 옵저버를 소유하지 않습니다. 레지스트리는 약한 참조만 보관하므로
//! 옵저버가 해제되면 등록도 자동으로 사라진 것처럼 동작합니다.

use alloc::rc::{Rc, Weak};
use core::cell::RefCell;

use super::keyboard::RawKeyEvent;
use super::mouse::MouseReport;

/// 키보드 리포트를 받는 옵저버
pub trait KeyboardObserver {
    fn on_key_event(&mut self, event: &RawKeyEvent);
}

/// 마우스 리포트를 받는 옵저버
pub trait MouseObserver {
    fn on_mouse_event(&mut self, report: &MouseReport);
}

/// 클래스별 옵저버 슬롯 (각각 최대 1개)
#[derive(Default)]
pub struct ObserverRegistry {
    keyboard: Option<Weak<RefCell<dyn KeyboardObserver>>>,
    mouse: Option<Weak<RefCell<dyn MouseObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 키보드 옵저버 등록 (이전 등록을 대체)
    pub fn register_keyboard<O: KeyboardObserver + 'static>(&mut self, observer: &Rc<RefCell<O>>) {
        let observer: Rc<RefCell<dyn KeyboardObserver>> = observer.clone();
        self.keyboard = Some(Rc::downgrade(&observer));
    }

    /// 마우스 옵저버 등록 (이전 등록을 대체)
    pub fn register_mouse<O: MouseObserver + 'static>(&mut self, observer: &Rc<RefCell<O>>) {
        let observer: Rc<RefCell<dyn MouseObserver>> = observer.clone();
        self.mouse = Some(Rc::downgrade(&observer));
    }

    pub fn unregister_keyboard(&mut self) {
        self.keyboard = None;
    }

    pub fn unregister_mouse(&mut self) {
        self.mouse = None;
    }

    /// 살아 있는 키보드 옵저버가 있는지
    pub fn has_keyboard(&self) -> bool {
        self.keyboard.as_ref().map_or(false, |weak| weak.strong_count() > 0)
    }

    pub fn has_mouse(&self) -> bool {
        self.mouse.as_ref().map_or(false, |weak| weak.strong_count() > 0)
    }

    /// 키보드 옵저버 호출 (호출했으면 true)
    ///
    /// 옵저버가 이미 빌려진 상태(옵저버 안에서 재진입)면 건너뜁니다.
    pub fn notify_keyboard(&self, event: &RawKeyEvent) -> bool {
        let Some(observer) = self.keyboard.as_ref().and_then(Weak::upgrade) else {
            return false;
        };
        let Ok(mut observer) = observer.try_borrow_mut() else {
            return false;
        };
        observer.on_key_event(event);
        true
    }

    /// 마우스 옵저버 호출 (호출했으면 true)
    pub fn notify_mouse(&self, report: &MouseReport) -> bool {
        let Some(observer) = self.mouse.as_ref().and_then(Weak::upgrade) else {
            return false;
        };
        let Ok(mut observer) = observer.try_borrow_mut() else {
            return false;
        };
        observer.on_mouse_event(report);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[derive(Default)]
    struct Recorder {
        keys: Vec<u8>,
    }

    impl KeyboardObserver for Recorder {
        fn on_key_event(&mut self, event: &RawKeyEvent) {
            self.keys.push(event.key1());
        }
    }

    #[derive(Default)]
    struct Motion {
        total_dx: i32,
    }

    impl MouseObserver for Motion {
        fn on_mouse_event(&mut self, report: &MouseReport) {
            self.total_dx += report.dx as i32;
        }
    }

    fn key(code: u8) -> RawKeyEvent {
        RawKeyEvent::from_bytes(&[0, 0, code, 0, 0, 0, 0, 0])
    }

    #[test]
    fn registration_replaces_previous_observer() {
        let first = Rc::new(RefCell::new(Recorder::default()));
        let second = Rc::new(RefCell::new(Recorder::default()));
        let mut registry = ObserverRegistry::new();

        registry.register_keyboard(&first);
        assert!(registry.notify_keyboard(&key(0x04)));
        registry.register_keyboard(&second);
        assert!(registry.notify_keyboard(&key(0x05)));

        assert_eq!(first.borrow().keys, [0x04]);
        assert_eq!(second.borrow().keys, [0x05]);
    }

    #[test]
    fn registry_does_not_keep_observer_alive() {
        let mut registry = ObserverRegistry::new();
        {
            let observer = Rc::new(RefCell::new(Recorder::default()));
            registry.register_keyboard(&observer);
            assert!(registry.has_keyboard());
            assert_eq!(Rc::strong_count(&observer), 1);
        }
        assert!(!registry.has_keyboard());
        assert!(!registry.notify_keyboard(&key(0x04)));
    }

    #[test]
    fn classes_are_independent() {
        let motion = Rc::new(RefCell::new(Motion::default()));
        let mut registry = ObserverRegistry::new();
        registry.register_mouse(&motion);

        assert!(!registry.notify_keyboard(&key(0x04)));
        assert!(registry.notify_mouse(&MouseReport::from_bytes(&[0, 5, 0])));
        assert!(registry.notify_mouse(&MouseReport::from_bytes(&[0, 0xFE, 0])));
        assert_eq!(motion.borrow().total_dx, 3);

        registry.unregister_mouse();
        assert!(!registry.has_mouse());
    }
}
