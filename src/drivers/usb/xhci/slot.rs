//! 디바이스 슬롯 관리
//!
//! 컨트롤러가 할당한 슬롯 ID를 디바이스별 상태(입력/출력 컨텍스트,
//! 엔드포인트 Transfer Ring, 제어 전송 버퍼)에 연결하고
//! Device Context Base Address Array(DCBAA)를 소유합니다.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::config::XhciConfig;
use crate::drivers::usb::error::UsbError;
use crate::drivers::usb::host_controller::PortSpeed;
use crate::drivers::usb::xhci::context::{DeviceContext, InputContext, EP0_DCI};
use crate::drivers::usb::xhci::ring::TransferRing;
use crate::memory::DmaBuffer;

/// 컨텍스트 정렬 (64바이트)
const CONTEXT_ALIGNMENT: usize = 64;
/// 스크래치패드 페이지 크기
const SCRATCHPAD_PAGE_SIZE: usize = 4096;

/// 슬롯에 대한 세대 표시 핸들
///
/// 같은 슬롯 ID가 해제 후 재할당되면 세대가 달라지므로
/// 이전 핸들은 더 이상 유효하지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle {
    slot_id: u8,
    generation: u32,
}

impl SlotHandle {
    pub fn slot_id(&self) -> u8 {
        self.slot_id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// 활성 디바이스 슬롯
pub struct DeviceSlot {
    handle: SlotHandle,
    port_id: u8,
    speed: PortSpeed,
    input_context: DmaBuffer<InputContext>,
    output_context: DmaBuffer<DeviceContext>,
    control_buffer: DmaBuffer<u8>,
    /// DCI → Transfer Ring (EP0 포함)
    rings: BTreeMap<u8, TransferRing>,
    /// Disable Slot 완료 대기 중 (메모리는 아직 컨트롤러 소유)
    released: bool,
}

impl DeviceSlot {
    pub fn handle(&self) -> SlotHandle {
        self.handle
    }

    pub fn slot_id(&self) -> u8 {
        self.handle.slot_id
    }

    pub fn port_id(&self) -> u8 {
        self.port_id
    }

    pub fn speed(&self) -> PortSpeed {
        self.speed
    }

    /// Address Device / Configure Endpoint 명령에 넣을 입력 컨텍스트 주소
    pub fn input_context_phys(&self) -> u64 {
        self.input_context.phys_addr().as_u64()
    }

    pub fn input_context(&self) -> InputContext {
        self.input_context.read(0)
    }

    /// 컨트롤러가 갱신한 출력 컨텍스트 (읽기 전용)
    pub fn output_context(&self) -> DeviceContext {
        self.output_context.read(0)
    }

    pub fn output_context_phys(&self) -> u64 {
        self.output_context.phys_addr().as_u64()
    }

    pub fn transfer_ring(&self, dci: u8) -> Option<&TransferRing> {
        self.rings.get(&dci)
    }

    pub fn transfer_ring_mut(&mut self, dci: u8) -> Option<&mut TransferRing> {
        self.rings.get_mut(&dci)
    }

    /// 엔드포인트 Transfer Ring 할당
    ///
    /// 같은 DCI에 이미 링이 있으면 교체합니다.
    pub fn add_endpoint(&mut self, dci: u8, ring_size: usize) -> Result<&TransferRing, UsbError> {
        if dci == 0 || dci > 31 {
            return Err(UsbError::InvalidParameter);
        }
        let ring = TransferRing::new(ring_size)?;
        self.rings.insert(dci, ring);
        self.rings.get(&dci).ok_or(UsbError::InvalidParameter)
    }

    /// 링이 있는 DCI 목록
    pub fn endpoint_indices(&self) -> impl Iterator<Item = u8> + '_ {
        self.rings.keys().copied()
    }

    pub fn control_buffer(&self) -> &DmaBuffer<u8> {
        &self.control_buffer
    }

    pub fn control_buffer_mut(&mut self) -> &mut DmaBuffer<u8> {
        &mut self.control_buffer
    }
}

/// 슬롯 관리자
pub struct SlotManager {
    max_slots: u8,
    /// 인덱스 0은 스크래치패드 배열, 1..=max_slots는 출력 컨텍스트
    dcbaa: DmaBuffer<u64>,
    scratchpad_array: Option<DmaBuffer<u64>>,
    scratchpad_pages: Vec<DmaBuffer<u8>>,
    slots: BTreeMap<u8, DeviceSlot>,
    next_generation: u32,
    transfer_ring_size: usize,
    control_buffer_size: usize,
}

impl SlotManager {
    pub fn new(config: &XhciConfig, scratchpad_count: u16) -> Result<Self, UsbError> {
        config.validate()?;

        let mut dcbaa = DmaBuffer::<u64>::new_zeroed(config.max_slots as usize + 1, CONTEXT_ALIGNMENT)?;

        let mut scratchpad_pages = Vec::new();
        let scratchpad_array = if scratchpad_count > 0 {
            let mut array = DmaBuffer::<u64>::new_zeroed(scratchpad_count as usize, CONTEXT_ALIGNMENT)?;
            for i in 0..scratchpad_count as usize {
                let page = DmaBuffer::<u8>::new_zeroed(SCRATCHPAD_PAGE_SIZE, SCRATCHPAD_PAGE_SIZE)?;
                array.write(i, page.phys_addr().as_u64());
                scratchpad_pages.push(page);
            }
            dcbaa.write(0, array.phys_addr().as_u64());
            Some(array)
        } else {
            None
        };

        Ok(Self {
            max_slots: config.max_slots,
            dcbaa,
            scratchpad_array,
            scratchpad_pages,
            slots: BTreeMap::new(),
            next_generation: 1,
            transfer_ring_size: config.transfer_ring_size,
            control_buffer_size: config.control_buffer_size,
        })
    }

    /// DCBAAP에 쓸 주소
    pub fn dcbaa_phys(&self) -> u64 {
        self.dcbaa.phys_addr().as_u64()
    }

    pub fn max_slots(&self) -> u8 {
        self.max_slots
    }

    pub fn scratchpad_count(&self) -> usize {
        self.scratchpad_pages.len()
    }

    /// DCBAA 엔트리 읽기
    pub fn dcbaa_entry(&self, index: u8) -> Option<u64> {
        ((index as usize) < self.dcbaa.len()).then(|| self.dcbaa.read(index as usize))
    }

    /// 새로 활성화된 슬롯 등록
    ///
    /// 컨텍스트, EP0 Transfer Ring, 제어 버퍼를 만들고 DCBAA에 출력 컨텍스트를 연결합니다.
    pub fn allocate_slot(&mut self, slot_id: u8, port_id: u8, speed: PortSpeed) -> Result<SlotHandle, UsbError> {
        if slot_id == 0 || slot_id > self.max_slots {
            return Err(UsbError::SlotNotFound(slot_id));
        }
        if self.slots.contains_key(&slot_id) {
            return Err(UsbError::SlotAlreadyAllocated(slot_id));
        }

        let input_context = DmaBuffer::<InputContext>::new_zeroed(1, CONTEXT_ALIGNMENT)?;
        let output_context = DmaBuffer::<DeviceContext>::new_zeroed(1, CONTEXT_ALIGNMENT)?;
        let control_buffer = DmaBuffer::<u8>::new_zeroed(self.control_buffer_size, CONTEXT_ALIGNMENT)?;
        let mut rings = BTreeMap::new();
        rings.insert(EP0_DCI, TransferRing::new(self.transfer_ring_size)?);

        let handle = SlotHandle {
            slot_id,
            generation: self.next_generation,
        };
        self.next_generation = self.next_generation.wrapping_add(1);

        self.dcbaa
            .write(slot_id as usize, output_context.phys_addr().as_u64());
        self.slots.insert(
            slot_id,
            DeviceSlot {
                handle,
                port_id,
                speed,
                input_context,
                output_context,
                control_buffer,
                rings,
                released: false,
            },
        );

        crate::log_debug!("USB: slot {} allocated for port {}", slot_id, port_id);
        Ok(handle)
    }

    /// 입력 컨텍스트 (명령 발행 전 소프트웨어가 채우는 영역)
    pub fn input_context_for(&mut self, slot_id: u8) -> Option<&mut InputContext> {
        self.slot_mut(slot_id)
            .map(|slot| slot.input_context.get_mut(0))
    }

    /// 슬롯 해제
    ///
    /// 슬롯과 모든 Transfer Ring을 무효화합니다. 이후 조회와 디스패치는 이 슬롯을
    /// 보지 못하지만, 컨트롤러가 아직 DMA 중일 수 있으므로 메모리와 DCBAA 엔트리는
    /// Disable Slot 완료 후 [`SlotManager::reclaim_slot`]까지 유지됩니다.
    pub fn release_slot(&mut self, slot_id: u8) -> Result<(), UsbError> {
        let slot = self.slot_mut(slot_id).ok_or(UsbError::SlotNotFound(slot_id))?;
        slot.released = true;
        crate::log_debug!("USB: slot {} released, awaiting Disable Slot", slot_id);
        Ok(())
    }

    /// 해제된 슬롯의 메모리 회수
    ///
    /// 컨트롤러가 Disable Slot을 완료한 뒤에만 호출합니다.
    pub fn reclaim_slot(&mut self, slot_id: u8) -> Result<(), UsbError> {
        if !self.is_releasing(slot_id) {
            return Err(UsbError::SlotNotFound(slot_id));
        }
        self.slots.remove(&slot_id);
        self.dcbaa.write(slot_id as usize, 0);
        crate::log_debug!("USB: slot {} reclaimed", slot_id);
        Ok(())
    }

    /// Disable Slot 완료를 기다리는 슬롯인지
    pub fn is_releasing(&self, slot_id: u8) -> bool {
        self.slots.get(&slot_id).map_or(false, |slot| slot.released)
    }

    /// 핸들이 현재 활성 슬롯을 가리키는지
    pub fn is_current(&self, handle: SlotHandle) -> bool {
        self.get(handle).is_some()
    }

    /// 핸들로 슬롯 조회 (이전 세대 핸들이거나 해제된 슬롯이면 `None`)
    pub fn get(&self, handle: SlotHandle) -> Option<&DeviceSlot> {
        self.slot(handle.slot_id).filter(|slot| slot.handle == handle)
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut DeviceSlot> {
        self.slot_mut(handle.slot_id)
            .filter(|slot| slot.handle == handle)
    }

    pub fn slot(&self, slot_id: u8) -> Option<&DeviceSlot> {
        self.slots.get(&slot_id).filter(|slot| !slot.released)
    }

    pub fn slot_mut(&mut self, slot_id: u8) -> Option<&mut DeviceSlot> {
        self.slots.get_mut(&slot_id).filter(|slot| !slot.released)
    }

    /// 활성 슬롯 수 (해제 대기 중인 슬롯 제외)
    pub fn active_count(&self) -> usize {
        self.slots.values().filter(|slot| !slot.released).count()
    }

    pub fn has_scratchpad(&self) -> bool {
        self.scratchpad_array.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SlotManager {
        SlotManager::new(&XhciConfig::DEFAULT, 0).unwrap()
    }

    #[test]
    fn allocation_links_output_context() {
        let mut slots = manager();
        let handle = slots.allocate_slot(3, 1, PortSpeed::Full).unwrap();
        assert_eq!(handle.slot_id(), 3);

        let slot = slots.get(handle).unwrap();
        assert_eq!(slots.dcbaa_entry(3), Some(slot.output_context_phys()));
        assert_eq!(slot.port_id(), 1);
        assert!(slot.transfer_ring(EP0_DCI).is_some());
        assert_eq!(slot.control_buffer().len(), XhciConfig::DEFAULT.control_buffer_size);
    }

    #[test]
    fn duplicate_slot_id_is_rejected() {
        let mut slots = manager();
        slots.allocate_slot(2, 1, PortSpeed::Low).unwrap();
        assert_eq!(
            slots.allocate_slot(2, 4, PortSpeed::Low),
            Err(UsbError::SlotAlreadyAllocated(2))
        );
        assert_eq!(
            slots.allocate_slot(0, 1, PortSpeed::Low),
            Err(UsbError::SlotNotFound(0))
        );
        assert_eq!(
            slots.allocate_slot(XhciConfig::DEFAULT.max_slots + 1, 1, PortSpeed::Low),
            Err(UsbError::SlotNotFound(XhciConfig::DEFAULT.max_slots + 1))
        );
    }

    #[test]
    fn release_invalidates_old_handles() {
        let mut slots = manager();
        let first = slots.allocate_slot(1, 1, PortSpeed::Full).unwrap();
        slots.release_slot(1).unwrap();
        slots.reclaim_slot(1).unwrap();

        assert!(!slots.is_current(first));
        assert_eq!(slots.dcbaa_entry(1), Some(0));
        assert_eq!(slots.release_slot(1), Err(UsbError::SlotNotFound(1)));
        assert_eq!(slots.reclaim_slot(1), Err(UsbError::SlotNotFound(1)));

        // 같은 ID 재사용 시 새 세대
        let second = slots.allocate_slot(1, 2, PortSpeed::Full).unwrap();
        assert_ne!(first, second);
        assert!(slots.is_current(second));
        assert!(slots.get(first).is_none());
    }

    #[test]
    fn released_slot_keeps_memory_until_reclaimed() {
        let mut slots = manager();
        let handle = slots.allocate_slot(4, 2, PortSpeed::Full).unwrap();
        let output = slots.get(handle).unwrap().output_context_phys();
        assert_eq!(slots.reclaim_slot(4), Err(UsbError::SlotNotFound(4)));

        slots.release_slot(4).unwrap();
        assert!(slots.is_releasing(4));
        assert!(!slots.is_current(handle));
        assert!(slots.slot(4).is_none());
        assert!(slots.input_context_for(4).is_none());
        assert_eq!(slots.active_count(), 0);
        // 컨트롤러가 아직 출력 컨텍스트를 쓸 수 있음
        assert_eq!(slots.dcbaa_entry(4), Some(output));
        // 컨트롤러는 Disable Slot 완료 전까지 같은 ID를 주지 않음
        assert_eq!(
            slots.allocate_slot(4, 2, PortSpeed::Full),
            Err(UsbError::SlotAlreadyAllocated(4))
        );
        assert_eq!(slots.release_slot(4), Err(UsbError::SlotNotFound(4)));

        slots.reclaim_slot(4).unwrap();
        assert!(!slots.is_releasing(4));
        assert_eq!(slots.dcbaa_entry(4), Some(0));
        assert!(slots.allocate_slot(4, 2, PortSpeed::Full).is_ok());
    }

    #[test]
    fn input_context_is_staged_per_slot() {
        let mut slots = manager();
        slots.allocate_slot(5, 2, PortSpeed::High).unwrap();
        {
            let input = slots.input_context_for(5).unwrap();
            input.control.set_add_flag(0);
            input.slot.set_root_hub_port(2);
        }
        let slot = slots.slot(5).unwrap();
        assert_eq!(slot.input_context().control.add_flags(), 1);
        assert_eq!(slot.input_context().slot.root_hub_port(), 2);
        assert!(slots.input_context_for(6).is_none());
    }

    #[test]
    fn scratchpad_array_goes_to_dcbaa_zero() {
        let slots = SlotManager::new(&XhciConfig::DEFAULT, 2).unwrap();
        assert!(slots.has_scratchpad());
        assert_eq!(slots.scratchpad_count(), 2);
        assert_ne!(slots.dcbaa_entry(0), Some(0));
    }
}
