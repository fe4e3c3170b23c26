//! xHCI TRB 링
//!
//! - [`ProducerRing`]: 소프트웨어가 생산하고 컨트롤러가 소비하는 링
//!   (Command Ring, 엔드포인트별 Transfer Ring). 마지막 칸에 Link TRB가 있습니다.
//! - [`EventRing`]: 컨트롤러가 생산하고 소프트웨어가 소비하는 단일 세그먼트 링.
//!
//! 두 방향 모두 cycle 비트로 소유권을 넘깁니다. 생산자는 자신의 cycle 상태를
//! TRB에 써서 넘기고, 소비자는 기대하는 cycle과 같은 TRB만 유효로 봅니다.

use core::ptr;
use core::sync::atomic::{fence, Ordering};

use crate::config::{MAX_RING_SIZE, MIN_RING_SIZE};
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::xhci::context::ErstEntry;
use crate::drivers::usb::xhci::trb::{Trb, TrbType};
use crate::memory::DmaBuffer;

/// 링 세그먼트 정렬 (64바이트)
const RING_ALIGNMENT: usize = 64;

/// 소프트웨어 생산자 링
///
/// 사용 가능한 칸은 `size`개이고 인덱스 `size`에 Link TRB가 있습니다.
/// 가득 참과 비어 있음을 구분하기 위해 항상 한 칸을 비워 두므로
/// 동시에 미완료 상태로 둘 수 있는 TRB는 `size - 1`개입니다.
pub struct ProducerRing {
    trbs: DmaBuffer<Trb>,
    size: usize,
    enqueue_index: usize,
    /// 컨트롤러가 완료를 보고한 다음 위치
    dequeue_index: usize,
    /// Producer Cycle State
    cycle: bool,
}

/// Command Ring
pub type CommandRing = ProducerRing;
/// Transfer Ring
pub type TransferRing = ProducerRing;

impl ProducerRing {
    /// Toggle Cycle이 설정된 Link TRB로 링 생성
    pub fn new(size: usize) -> Result<Self, UsbError> {
        Self::with_link_toggle(size, true)
    }

    /// Link TRB의 Toggle Cycle 비트를 지정해 링 생성
    pub fn with_link_toggle(size: usize, toggle_cycle: bool) -> Result<Self, UsbError> {
        if !(MIN_RING_SIZE..=MAX_RING_SIZE).contains(&size) {
            return Err(UsbError::InvalidParameter);
        }

        let mut trbs = DmaBuffer::<Trb>::new_zeroed(size + 1, RING_ALIGNMENT)?;
        let base = trbs.phys_addr().as_u64();
        // Link TRB는 처음에 소프트웨어 소유 (cycle 0)
        trbs.write(size, Trb::link(base, toggle_cycle));

        Ok(Self {
            trbs,
            size,
            enqueue_index: 0,
            dequeue_index: 0,
            cycle: true,
        })
    }

    /// TRB 추가
    ///
    /// 기록한 TRB의 물리 주소를 반환합니다. 완료 이벤트는 이 주소로 매칭됩니다.
    pub fn enqueue(&mut self, trb: Trb) -> Result<u64, UsbError> {
        if self.is_full() {
            return Err(UsbError::RingFull);
        }

        let index = self.enqueue_index;
        let phys = self.trbs.phys_addr_of(index).as_u64();
        self.publish(index, trb, self.cycle);

        self.enqueue_index += 1;
        if self.enqueue_index == self.size {
            self.wrap();
        }

        Ok(phys)
    }

    /// Link TRB를 넘겨 링 시작으로 돌아감
    fn wrap(&mut self) {
        let link = self.trbs.read(self.size);
        self.publish(self.size, link, self.cycle);
        if link.toggle_cycle() {
            self.cycle = !self.cycle;
        }
        self.enqueue_index = 0;
    }

    /// 본문을 먼저 쓰고 cycle 비트가 든 control dword를 마지막에 씀
    fn publish(&mut self, index: usize, mut trb: Trb, cycle: bool) {
        trb.set_cycle_bit(cycle);
        let slot = self.trbs.as_mut_ptr(index);
        // SAFETY: slot은 링 버퍼 안의 유효한 TRB를 가리킵니다.
        unsafe {
            ptr::write_volatile(ptr::addr_of_mut!((*slot).parameter), trb.parameter);
            ptr::write_volatile(ptr::addr_of_mut!((*slot).status), trb.status);
            fence(Ordering::Release);
            ptr::write_volatile(ptr::addr_of_mut!((*slot).control), trb.control);
        }
    }

    /// 컨트롤러가 `phys`의 TRB까지 처리했음을 기록
    ///
    /// 미완료 구간 밖의 주소(이미 완료된 TRB, 다른 링의 TRB)는 무시하고 false를 반환합니다.
    pub fn advance_dequeue(&mut self, phys: u64) -> bool {
        let index = match self.trbs.index_of(phys) {
            Some(index) if index < self.size => index,
            _ => return false,
        };
        let distance = (index + self.size - self.dequeue_index) % self.size;
        if distance >= self.len() {
            return false;
        }
        self.dequeue_index = (index + 1) % self.size;
        true
    }

    /// 미완료 TRB 수
    pub fn len(&self) -> usize {
        (self.enqueue_index + self.size - self.dequeue_index) % self.size
    }

    pub fn is_empty(&self) -> bool {
        self.enqueue_index == self.dequeue_index
    }

    pub fn is_full(&self) -> bool {
        (self.enqueue_index + 1) % self.size == self.dequeue_index
    }

    /// 동시에 미완료로 둘 수 있는 최대 TRB 수
    pub fn capacity(&self) -> usize {
        self.size - 1
    }

    /// Link TRB를 제외한 칸 수
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn cycle_state(&self) -> bool {
        self.cycle
    }

    pub fn enqueue_index(&self) -> usize {
        self.enqueue_index
    }

    /// 링 시작 물리 주소
    pub fn base_phys(&self) -> u64 {
        self.trbs.phys_addr().as_u64()
    }

    /// CRCR / TR Dequeue Pointer에 쓸 값 (시작 주소 | 초기 cycle)
    pub fn dequeue_pointer(&self) -> u64 {
        self.base_phys() | self.cycle as u64
    }

    /// 인덱스의 TRB 읽기 (Link TRB 포함, 0..=size)
    pub fn read(&self, index: usize) -> Trb {
        self.trbs.read(index)
    }

    /// 물리 주소의 TRB 읽기
    pub fn trb_at(&self, phys: u64) -> Option<Trb> {
        self.trbs.index_of(phys).map(|index| self.trbs.read(index))
    }
}

/// 생산자 링을 하드웨어 입장에서 읽는 소비자 커서
///
/// 컨트롤러와 같은 규칙(cycle 비교, Link TRB 추종)으로 TRB를 꺼냅니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareCursor {
    index: usize,
    cycle: bool,
}

impl HardwareCursor {
    /// 링 시작, Consumer Cycle State 1에서 출발
    pub fn new() -> Self {
        Self {
            index: 0,
            cycle: true,
        }
    }

    pub fn cycle_state(&self) -> bool {
        self.cycle
    }

    /// 다음 유효 TRB와 그 물리 주소
    pub fn dequeue(&mut self, ring: &ProducerRing) -> Option<(u64, Trb)> {
        // 한 바퀴에 Link TRB는 한 번만 만남
        for _ in 0..2 {
            let trb = ring.read(self.index);
            if trb.cycle_bit() != self.cycle {
                return None;
            }
            if trb.trb_type() == Some(TrbType::Link) {
                if trb.toggle_cycle() {
                    self.cycle = !self.cycle;
                }
                self.index = 0;
                continue;
            }
            let phys = ring.base_phys() + (self.index * Trb::SIZE) as u64;
            self.index += 1;
            return Some((phys, trb));
        }
        None
    }
}

impl Default for HardwareCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Event Ring (단일 세그먼트)
pub struct EventRing {
    segment: DmaBuffer<Trb>,
    erst: DmaBuffer<ErstEntry>,
    dequeue_index: usize,
    /// Consumer Cycle State
    cycle: bool,
}

impl EventRing {
    pub fn new(size: usize) -> Result<Self, UsbError> {
        if !(MIN_RING_SIZE..=MAX_RING_SIZE).contains(&size) {
            return Err(UsbError::InvalidParameter);
        }

        let segment = DmaBuffer::<Trb>::new_zeroed(size, RING_ALIGNMENT)?;
        let mut erst = DmaBuffer::<ErstEntry>::new_zeroed(1, RING_ALIGNMENT)?;
        erst.write(0, ErstEntry::new(segment.phys_addr().as_u64(), size as u16));

        Ok(Self {
            segment,
            erst,
            dequeue_index: 0,
            cycle: true,
        })
    }

    /// 다음 이벤트 꺼내기
    ///
    /// cycle 비트가 기대값과 다르면 아직 컨트롤러가 쓰지 않은 칸이므로 `None`입니다.
    pub fn dequeue(&mut self) -> Option<Trb> {
        let slot = self.segment.as_mut_ptr(self.dequeue_index);
        // SAFETY: slot은 세그먼트 안의 유효한 TRB를 가리킵니다.
        let trb = unsafe {
            let control = ptr::read_volatile(ptr::addr_of!((*slot).control));
            if (control & 1 != 0) != self.cycle {
                return None;
            }
            fence(Ordering::Acquire);
            Trb {
                parameter: ptr::read_volatile(ptr::addr_of!((*slot).parameter)),
                status: ptr::read_volatile(ptr::addr_of!((*slot).status)),
                control,
            }
        };

        self.dequeue_index += 1;
        if self.dequeue_index == self.segment.len() {
            self.dequeue_index = 0;
            self.cycle = !self.cycle;
        }
        Some(trb)
    }

    /// ERDP에 쓸 현재 dequeue 물리 주소
    pub fn dequeue_pointer(&self) -> u64 {
        self.segment.phys_addr_of(self.dequeue_index).as_u64()
    }

    /// ERSTBA에 쓸 Segment Table 주소
    pub fn erst_phys(&self) -> u64 {
        self.erst.phys_addr().as_u64()
    }

    /// ERSTSZ (세그먼트 수)
    pub fn erst_size(&self) -> u32 {
        self.erst.len() as u32
    }

    pub fn erst_entry(&self) -> ErstEntry {
        self.erst.read(0)
    }

    /// 세그먼트의 TRB 수
    pub fn size(&self) -> usize {
        self.segment.len()
    }

    pub fn cycle_state(&self) -> bool {
        self.cycle
    }

    /// 컨트롤러 대신 세그먼트에 이벤트 기록 (시뮬레이터용)
    #[cfg(test)]
    pub(crate) fn hardware_write(&mut self, index: usize, trb: Trb) {
        let slot = self.segment.as_mut_ptr(index);
        // SAFETY: slot은 세그먼트 안의 유효한 TRB를 가리킵니다.
        unsafe {
            ptr::write_volatile(ptr::addr_of_mut!((*slot).parameter), trb.parameter);
            ptr::write_volatile(ptr::addr_of_mut!((*slot).status), trb.status);
            fence(Ordering::Release);
            ptr::write_volatile(ptr::addr_of_mut!((*slot).control), trb.control);
        }
    }
}

/// 컨트롤러 쪽 Event Ring 생산자 (시뮬레이터용)
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct EventProducer {
    index: usize,
    cycle: bool,
}

#[cfg(test)]
impl EventProducer {
    pub(crate) fn new() -> Self {
        Self {
            index: 0,
            cycle: true,
        }
    }

    pub(crate) fn push(&mut self, ring: &mut EventRing, mut trb: Trb) {
        trb.set_cycle_bit(self.cycle);
        ring.hardware_write(self.index, trb);
        self.index += 1;
        if self.index == ring.size() {
            self.index = 0;
            self.cycle = !self.cycle;
        }
    }
}
