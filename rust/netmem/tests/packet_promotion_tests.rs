use netmem::config::MemoryConfig;
use netmem::{ByteOrder, ExternalBuffer, MemoryContext, MemoryPool, MemoryRegion, NativeBuffer};
use std::sync::Arc;

/// Builds an Ethernet + IPv4 + TCP frame carrying an HTTP request line.
fn capture_frame() -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 20 + 20];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    frame[14] = 0x45;
    frame[16..18].copy_from_slice(&((20 + 20 + 18) as u16).to_be_bytes());
    frame[23] = 6;
    frame[26..30].copy_from_slice(&[192, 168, 1, 10]);
    frame[30..34].copy_from_slice(&[10, 0, 0, 1]);
    frame[34..36].copy_from_slice(&51234u16.to_be_bytes());
    frame[36..38].copy_from_slice(&80u16.to_be_bytes());
    frame[46] = 5 << 4;
    frame.extend_from_slice(b"GET / HTTP/1.1\r\n\r\n");
    frame
}

/// End-to-end flow of a captured packet through the memory layer.
///
/// This test validates:
/// 1. Peering a read-only view onto driver-owned memory
/// 2. Decoding header fields in network byte order through sub-region peers
/// 3. Promoting the transient packet and its header into pooled storage
/// 4. Reusing the driver buffer without affecting the promoted copy
/// 5. Releasing every byte once the promoted regions are dropped
#[test]
fn test_packet_promotion_end_to_end() {
    let context = MemoryContext::new(MemoryConfig::default());
    let pool = MemoryPool::with_context(context.clone(), 1024).expect("Failed to create pool");

    // The capture driver hands over a frame in its own buffer.
    let frame = capture_frame();
    let driver = Arc::new(ExternalBuffer::from_bytes(&frame));
    let mut packet = NativeBuffer::new().with_order(ByteOrder::NETWORK);
    packet
        .peer_external(driver.clone())
        .expect("Failed to peer onto driver buffer");
    assert!(!packet.is_region_based_owner());

    assert_eq!(packet.get_u16(12).unwrap(), 0x0800);
    let mut ip = NativeBuffer::new().with_order(ByteOrder::NETWORK);
    ip.peer(&packet, 14, 20).expect("Failed to peer onto IPv4 header");
    assert_eq!(ip.get_u8(0).unwrap() & 0x0f, 5);
    assert_eq!(ip.get_u16(2).unwrap(), 58);
    assert_eq!(ip.get_bytes(12, 4).unwrap(), [192, 168, 1, 10]);

    let mut tcp = NativeBuffer::new().with_order(ByteOrder::NETWORK);
    tcp.peer(&packet, 34, 20).expect("Failed to peer onto TCP header");
    assert_eq!(tcp.get_u16(0).unwrap(), 51234);
    assert_eq!(tcp.get_u16(2).unwrap(), 80);
    let payload_offset = 34 + usize::from(tcp.get_u8(12).unwrap() >> 4) * 4;

    let mut http = NativeBuffer::new();
    http.peer(&packet, payload_offset, frame.len() - payload_offset)
        .expect("Failed to peer onto payload");
    let line_len = http.find_delimited(0, b"\r\n").unwrap();
    assert_eq!(http.read_string(0, line_len).unwrap(), "GET / HTTP/1.1\r\n");

    // Promote the packet and a separately decoded header into pooled storage.
    let mut header_state = MemoryRegion::new();
    header_state.peer_external(Arc::new(vec![0xAAu8; 16])).unwrap();
    let mut kept_state = MemoryRegion::new();
    let mut kept = NativeBuffer::new().with_order(ByteOrder::NETWORK);
    pool.duplicate2(&header_state, &packet, &mut kept_state, &mut kept)
        .expect("Failed to promote packet");
    assert!(!kept.is_read_only());
    assert_eq!(kept.address(), kept_state.address() + 16);

    // The driver reuses its buffer for the next frame.
    let mut next = MemoryRegion::new();
    next.peer_external(driver.clone()).unwrap();
    next.transfer_from_slice(0, &[0xFF; 14], 0, 14).unwrap();
    assert_eq!(packet.get_u16(12).unwrap(), 0xFFFF);
    assert_eq!(kept.get_u16(12).unwrap(), 0x0800);
    assert_eq!(kept.get_u16(34).unwrap(), 51234);

    drop((packet, ip, tcp, http, next));
    assert!(context.accounting().total_active_allocated() > 0);

    drop((kept, kept_state));
    pool.shutdown();
    assert_eq!(context.accounting().total_active_allocated(), 0);
    assert_eq!(
        context.accounting().total_allocate_calls(),
        context.accounting().total_deallocate_calls()
    );
}

/// Transfers ownership of a direct allocation to a typed view and lets the original
/// handle go out of scope first.
#[test]
fn test_ownership_follows_transfer() {
    let context = MemoryContext::new(MemoryConfig::default());
    let mut view = NativeBuffer::new().with_order(ByteOrder::LittleEndian);
    {
        let mut owner = MemoryRegion::allocate_in(&context, 32).expect("Failed to allocate");
        view.peer_region(&owner).unwrap();
        assert!(view.transfer_ownership(&mut owner));
        assert!(!view.transfer_ownership(&mut owner));
    }
    view.set_u64(24, u64::MAX).unwrap();
    assert_eq!(view.get_i64(24).unwrap(), -1);
    assert_eq!(context.accounting().total_active_allocated(), 32);

    view.cleanup();
    assert_eq!(context.accounting().total_active_allocated(), 0);
    assert_eq!(context.accounting().total_deallocate_calls(), 1);
}
