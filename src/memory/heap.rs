//! 힙 할당자 설정
//!
//! 이 모듈은 커널 힙 할당자를 초기화하고 전역 할당자로 설정합니다.
//! 힙은 커널 이미지 안의 정적 영역을 사용하며, 베어메탈 빌드에서만 활성화됩니다.
//! 호스트 테스트에서는 표준 라이브러리 할당자가 대신 사용됩니다.

/// 힙 크기
pub const HEAP_SIZE: usize = 1024 * 1024; // 1 MiB

#[cfg(all(target_os = "none", not(test)))]
mod kernel_heap {
    use super::HEAP_SIZE;
    use linked_list_allocator::LockedHeap;

    #[repr(C, align(4096))]
    pub struct HeapSpace(pub [u8; HEAP_SIZE]);

    /// 힙 영역
    pub static mut HEAP_SPACE: HeapSpace = HeapSpace([0; HEAP_SIZE]);

    /// 전역 힙 할당자
    #[global_allocator]
    pub static ALLOCATOR: LockedHeap = LockedHeap::empty();
}

/// 힙 할당자 초기화
///
/// # Safety
/// 이 함수는 한 번만, 첫 할당 이전에 호출되어야 합니다.
pub unsafe fn init_heap() {
    #[cfg(all(target_os = "none", not(test)))]
    {
        let start = core::ptr::addr_of_mut!(kernel_heap::HEAP_SPACE) as *mut u8;
        kernel_heap::ALLOCATOR.lock().init(start, HEAP_SIZE);
    }
}

/// 현재 힙의 시작 주소와 크기를 반환 (바이트)
pub fn heap_bounds() -> (usize, usize) {
    #[cfg(all(target_os = "none", not(test)))]
    {
        let heap = kernel_heap::ALLOCATOR.lock();
        return (heap.bottom() as usize, heap.size());
    }
    #[allow(unreachable_code)]
    (0, 0)
}
