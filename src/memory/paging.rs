//! 가상 주소 → 물리 주소 변환
//!
//! 부트로더가 설정한 4단계 페이지 테이블을 통해 DMA 버퍼의 물리 주소를 구합니다.
//! 페이지 테이블을 사용할 수 없는 환경(호스트 테스트)에서는
//! 기록된 물리 메모리 오프셋을 빼는 방식으로 변환합니다 (기본값 0 = 항등 매핑).

use spin::Mutex;
use x86_64::{PhysAddr, VirtAddr};

// 부트 이후 캐시된 물리 메모리 오프셋
static PHYSICAL_MEMORY_OFFSET: Mutex<Option<VirtAddr>> = Mutex::new(None);

/// 물리 메모리 오프셋 기록
pub fn set_physical_memory_offset(offset: VirtAddr) {
    let mut guard = PHYSICAL_MEMORY_OFFSET.lock();
    *guard = Some(offset);
}

/// 기록된 물리 메모리 오프셋 (없으면 0)
pub fn physical_memory_offset() -> u64 {
    PHYSICAL_MEMORY_OFFSET
        .lock()
        .map(|offset| offset.as_u64())
        .unwrap_or(0)
}

/// 가상 주소를 물리 주소로 변환
pub fn virt_to_phys(virt: u64) -> PhysAddr {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        if let Some(phys) = translate_with_page_table(virt) {
            return phys;
        }
    }
    PhysAddr::new_truncate(virt.wrapping_sub(physical_memory_offset()))
}

/// 활성 페이지 테이블을 통한 변환
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn translate_with_page_table(virt: u64) -> Option<PhysAddr> {
    use x86_64::registers::control::Cr3;
    use x86_64::structures::paging::{OffsetPageTable, PageTable, Translate};

    let offset = (*PHYSICAL_MEMORY_OFFSET.lock())?;
    let virt = VirtAddr::try_new(virt).ok()?;

    // SAFETY: 오프셋은 부트로더가 전체 물리 메모리를 매핑한 위치이며,
    // CR3가 가리키는 레벨 4 테이블은 그 매핑 안에 있습니다.
    unsafe {
        let (level_4_table_frame, _) = Cr3::read();
        let table_virt = offset + level_4_table_frame.start_address().as_u64();
        let table: &mut PageTable = &mut *table_virt.as_mut_ptr();
        let mapper = OffsetPageTable::new(table, offset);
        mapper.translate_addr(virt)
    }
}
