use vitrine_api::psp::{cpf_valid, detect_brand, luhn_valid, CardBrand};

#[test]
fn luhn_reference_vectors() {
    // Test Visa from the storefront smoke suite
    assert!(luhn_valid("4539620659922097"));
    assert!(!luhn_valid("4539620659922098"));

    // Other well-known test numbers
    assert!(luhn_valid("5555555555554444")); // mastercard
    assert!(luhn_valid("378282246310005")); // amex
    assert!(!luhn_valid("1111111111111111"));
}

#[test]
fn brand_table_is_checked_most_specific_first() {
    assert_eq!(detect_brand("4539620659922097"), Some(CardBrand::Visa));
    assert_eq!(detect_brand("5555555555554444"), Some(CardBrand::Mastercard));
    assert_eq!(detect_brand("378282246310005"), Some(CardBrand::Amex));
    // Elo prefixes live inside the Visa "4" range and must win
    assert_eq!(detect_brand("4514160000000000"), Some(CardBrand::Elo));
    assert_eq!(detect_brand("5090000000000000"), Some(CardBrand::Elo));
    assert_eq!(detect_brand("6062820000000000"), Some(CardBrand::Hipercard));
    assert_eq!(detect_brand("9999999999999999"), None);
}

#[test]
fn cpf_two_pass_mod_eleven() {
    assert!(cpf_valid("12173958658"));
    assert!(cpf_valid("121.739.586-58"));
    assert!(!cpf_valid("12173958657"));
    assert!(!cpf_valid("12173958668"));
}

#[test]
fn all_equal_cpfs_always_fail() {
    // These strings satisfy the check-digit arithmetic but are rejected
    for cpf in [
        "00000000000",
        "11111111111",
        "22222222222",
        "33333333333",
        "44444444444",
        "55555555555",
        "66666666666",
        "77777777777",
        "88888888888",
        "99999999999",
    ] {
        assert!(!cpf_valid(cpf), "{} must be rejected", cpf);
    }
}
