use cardsmith_io::addressing::{
    blocks_in_sector, first_block_of, is_trailer, sector_of, trailer_of,
};
use cardsmith_io::{
    BlockAddress, CardHandle, CardType, DEFAULT_KEY, HwError, KeySlot, MifareKey,
    SectorTrailer, SimulatedCard,
};
use cardsmith_io::key::KeyParseError;

const KEY_X: MifareKey = MifareKey::new([0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5]);
const KEY_Y: MifareKey = MifareKey::new([0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5]);

// ============================================================================
// Addressing Tests
// ============================================================================

#[test]
fn test_block_3_is_sector_0_trailer() {
    assert_eq!(sector_of(3), 0);
    assert!(is_trailer(3));
}

#[test]
fn test_block_128_starts_large_sector_32() {
    assert_eq!(sector_of(128), 32);
    assert_eq!(first_block_of(32), 128);
    assert_eq!(blocks_in_sector(32), 16);
    assert!(!is_trailer(128));
}

#[test]
fn test_large_sector_trailer_at_offset_15() {
    assert_eq!(trailer_of(32), 143);
    assert!(is_trailer(143));
    assert!(!is_trailer(142));
    assert_eq!(trailer_of(39), 255);
}

#[test]
fn test_sector_and_first_block_are_inverses() {
    for sector in 0..40 {
        let first = first_block_of(sector);
        assert_eq!(sector_of(first), sector);
        for offset in 0..blocks_in_sector(sector) {
            assert_eq!(sector_of(first + offset), sector);
        }
    }
    for block in 0..256 {
        let sector = sector_of(block);
        let first = first_block_of(sector);
        assert!(block >= first && block < first + blocks_in_sector(sector));
    }
}

#[test]
fn test_exactly_one_trailer_per_sector() {
    for sector in 0..40 {
        let first = first_block_of(sector);
        let trailers = (first..first + blocks_in_sector(sector))
            .filter(|b| is_trailer(*b))
            .count();
        assert_eq!(trailers, 1, "sector {}", sector);
    }
}

#[test]
fn test_block_address_from_block() {
    let addr = BlockAddress::from_block(130);
    assert_eq!(addr.sector, 32);
    assert_eq!(addr.offset(), 2);
    assert!(!addr.is_trailer());
    assert!(BlockAddress::from_block(7).is_trailer());
}

#[test]
fn test_card_type_geometry() {
    assert_eq!(CardType::Mini.block_count(), 20);
    assert_eq!(CardType::Classic1K.block_count(), 64);
    assert_eq!(CardType::Classic2K.block_count(), 128);
    assert_eq!(CardType::Classic4K.block_count(), 256);
    assert_eq!(CardType::Classic1K.size(), 1024);
    assert_eq!(CardType::Classic4K.size(), 4096);
}

#[test]
fn test_card_type_display() {
    assert_eq!(CardType::Classic1K.to_string(), "MIFARE Classic 1K");
}

// ============================================================================
// Key Tests
// ============================================================================

#[test]
fn test_key_parse_and_display() {
    let key: MifareKey = "a0a1a2a3a4a5".parse().unwrap();
    assert_eq!(key, KEY_X);
    assert_eq!(key.to_string(), "A0A1A2A3A4A5");
}

#[test]
fn test_key_parse_rejects_wrong_length() {
    let err = "FFFF".parse::<MifareKey>().unwrap_err();
    assert_eq!(err, KeyParseError::Length { expected: 12, got: 4 });
    assert!(err.to_string().contains("12 hex digits"));
}

#[test]
fn test_key_parse_rejects_bad_hex() {
    let err = "ZZZZZZZZZZZZ".parse::<MifareKey>().unwrap_err();
    assert!(matches!(err, KeyParseError::Hex(_)));
    assert_eq!(err.clone(), err);
}

#[test]
fn test_key_serializes_as_hex_string() {
    let json = serde_json::to_string(&KEY_Y).unwrap();
    assert_eq!(json, "\"B0B1B2B3B4B5\"");
    let back: MifareKey = serde_json::from_str(&json).unwrap();
    assert_eq!(back, KEY_Y);
}

#[test]
fn test_key_redacted_hides_middle() {
    assert_eq!(KEY_X.redacted(), "A0********A5");
}

#[test]
fn test_slot_opposite() {
    assert_eq!(KeySlot::A.opposite(), KeySlot::B);
    assert_eq!(KeySlot::B.opposite(), KeySlot::A);
    assert_eq!(KeySlot::B.to_string(), "B");
}

#[test]
fn test_trailer_layout() {
    let trailer = SectorTrailer::new(KEY_X, KEY_Y);
    let block = trailer.to_block();
    assert_eq!(&block[0..6], KEY_X.as_bytes());
    assert_eq!(&block[6..10], &[0xFF, 0x07, 0x80, 0x69]);
    assert_eq!(&block[10..16], KEY_Y.as_bytes());
    assert_eq!(SectorTrailer::parse(&block), trailer);
    assert_eq!(trailer.key(KeySlot::B), KEY_Y);
}

// ============================================================================
// HwError Tests
// ============================================================================

#[test]
fn test_hw_error_connection_loss() {
    assert!(HwError::TagLost.is_connection_loss());
    assert!(HwError::NotConnected.is_connection_loss());
    assert!(!HwError::WriteRejected { block: 0 }.is_connection_loss());
}

// ============================================================================
// SimulatedCard Tests
// ============================================================================

#[tokio::test]
async fn test_simulated_requires_connect() {
    let mut card = SimulatedCard::new(CardType::Classic1K);
    let result = card.authenticate(0, &DEFAULT_KEY, KeySlot::A).await;
    assert_eq!(result, Err(HwError::NotConnected));
}

#[tokio::test]
async fn test_simulated_default_keys_authenticate() {
    let mut card = SimulatedCard::new(CardType::Classic1K);
    card.connect().await.unwrap();
    assert!(card.authenticate(5, &DEFAULT_KEY, KeySlot::A).await.unwrap());
    assert!(card.authenticate(5, &DEFAULT_KEY, KeySlot::B).await.unwrap());
    assert_eq!(card.stats().auth_attempts, 2);
}

#[tokio::test]
async fn test_simulated_wrong_key_drops_auth_state() {
    let mut card = SimulatedCard::new(CardType::Classic1K).with_sector_keys(1, KEY_X, KEY_Y);
    card.connect().await.unwrap();
    assert!(card.authenticate(1, &KEY_X, KeySlot::A).await.unwrap());
    assert!(card.read_block(4).await.is_ok());
    assert!(!card.authenticate(1, &KEY_X, KeySlot::B).await.unwrap());
    assert_eq!(card.read_block(4).await, Err(HwError::ReadDenied { block: 4 }));
}

#[tokio::test]
async fn test_simulated_read_requires_matching_sector() {
    let mut card = SimulatedCard::new(CardType::Classic1K);
    card.connect().await.unwrap();
    card.authenticate(0, &DEFAULT_KEY, KeySlot::A).await.unwrap();
    assert_eq!(card.read_block(4).await, Err(HwError::ReadDenied { block: 4 }));
}

#[tokio::test]
async fn test_simulated_trailer_hides_key_a() {
    let mut card = SimulatedCard::new(CardType::Classic1K).with_sector_keys(0, KEY_X, KEY_Y);
    card.connect().await.unwrap();
    card.authenticate(0, &KEY_X, KeySlot::A).await.unwrap();
    let trailer = card.read_block(3).await.unwrap();
    assert_eq!(&trailer[0..6], &[0u8; 6]);
    assert_eq!(&trailer[10..16], KEY_Y.as_bytes());
}

#[tokio::test]
async fn test_simulated_manufacturer_block_read_only() {
    let mut card = SimulatedCard::new(CardType::Classic1K);
    card.connect().await.unwrap();
    card.authenticate(0, &DEFAULT_KEY, KeySlot::A).await.unwrap();
    let result = card.write_block(0, &[0u8; 16]).await;
    assert_eq!(result, Err(HwError::WriteRejected { block: 0 }));
    assert_eq!(&card.block(0)[0..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[tokio::test]
async fn test_simulated_write_then_read() {
    let mut card = SimulatedCard::new(CardType::Classic1K);
    card.connect().await.unwrap();
    card.authenticate(2, &DEFAULT_KEY, KeySlot::A).await.unwrap();
    let payload = [0x42u8; 16];
    card.write_block(9, &payload).await.unwrap();
    assert_eq!(card.read_block(9).await.unwrap(), payload);
}

#[tokio::test]
async fn test_simulated_corrupt_write() {
    let mut card = SimulatedCard::new(CardType::Classic1K).corrupt_write(5);
    card.connect().await.unwrap();
    card.authenticate(1, &DEFAULT_KEY, KeySlot::A).await.unwrap();
    card.write_block(5, &[0x11; 16]).await.unwrap();
    assert_ne!(card.read_block(5).await.unwrap(), [0x11; 16]);
}

#[tokio::test]
async fn test_simulated_uid_rewrite_needs_magic() {
    let mut plain = SimulatedCard::new(CardType::Classic1K);
    plain.connect().await.unwrap();
    assert_eq!(
        plain.write_uid(&[1, 2, 3, 4]).await,
        Err(HwError::Unsupported("UID rewrite"))
    );

    let mut magic = SimulatedCard::new(CardType::Classic1K).magic();
    magic.connect().await.unwrap();
    magic.write_uid(&[1, 2, 3, 4]).await.unwrap();
    assert_eq!(magic.uid(), vec![1, 2, 3, 4]);
    assert_eq!(magic.block(0)[4], 1 ^ 2 ^ 3 ^ 4);
}

#[tokio::test]
async fn test_simulated_layout_fault() {
    let card = SimulatedCard::new(CardType::Classic1K).fail_layout(2);
    assert!(card.blocks_in_sector(2).is_err());
    assert_eq!(card.blocks_in_sector(3), Ok(4));
    assert_eq!(card.first_block_of(3), Ok(12));
    assert_eq!(card.first_block_of(16), Err(HwError::NoSuchSector { sector: 16 }));
}

#[tokio::test]
async fn test_simulated_close_counts_even_on_failure() {
    let mut card = SimulatedCard::new(CardType::Mini).fail_close();
    card.connect().await.unwrap();
    assert!(card.close().is_err());
    assert!(!card.is_connected());
    assert_eq!(card.stats().closes, 1);
}
