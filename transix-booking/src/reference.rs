use rand::Rng;
use transix_domain::StoreError;

use crate::store::ReservationStore;

// excludes the ambiguous characters 0/O/1/I
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const REFERENCE_LEN: usize = 8;

pub fn generate_reference() -> String {
    let mut rng = rand::thread_rng();
    (0..REFERENCE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect()
}

/// Generate a reference no existing ticket uses, retrying on collision
pub async fn unique_reference(store: &dyn ReservationStore) -> Result<String, StoreError> {
    loop {
        let reference = generate_reference();
        if !store.reference_exists(&reference).await? {
            return Ok(reference);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_shape() {
        for _ in 0..100 {
            let reference = generate_reference();
            assert_eq!(reference.len(), 8);
            assert!(reference.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_ambiguous_characters_excluded() {
        for _ in 0..100 {
            let reference = generate_reference();
            assert!(!reference.contains(['0', 'O', '1', 'I']));
        }
    }
}
