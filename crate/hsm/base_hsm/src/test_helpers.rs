//! Deterministic RSA-2048 material for the test-suites.
//!
//! The constants are the components of one real RSA key (public exponent
//! 65537), so DER encoders and decoders downstream see numerically
//! consistent CRT values rather than random bytes.

use keyview_interfaces::RsaPrivateKeyMaterial;
use zeroize::Zeroizing;

use crate::{HError, HResult};

const TEST_RSA_MODULUS_HEX: &str = concat!(
    "8edf771a7a8ae8af988899c01412f3eeef5bfd8dc7ae8214ffac36cd152d709d",
    "4fb5b44ffc2cf599779584aac2e5bd7d88bc4cfa2920acdde6cefcca9bc80544",
    "33961bc1e3b41cacd9fb181ba7cf0eca266d731e45db917e825ae59382d580cd",
    "002080542c10c341413239abcfc2c1770c1f97801450eab495a15472ad9266f4",
    "5d0cfd1d2c58a1ff92ca473311252d7926110ebef676d0d3901ccdf5588f74c9",
    "e614bf3f70ae047e025fdf516cb9a2e8a5be50326ade91606a7f54d179b744cd",
    "f36a803be3a36f5dbcc650659eabe1387753796fe5cad4192362de514ce575ad",
    "376ab19d2fba76405dfcaf8321d0ceb527467bb75339c287291c57a3d26476a1",
);

const TEST_RSA_PRIVATE_EXPONENT_HEX: &str = concat!(
    "017a8f00b6581bd78ded4b84973c993b5dcd3aa10a1a1c78efcac2343211fae4",
    "78edcb3688f854e82c4a7f1196a3f2b7b2f7aa770c200d43fc72a3df8bb858b4",
    "1b91d41a98130e192ca6267a2a4ce884f77bfa651bc15d9694ee308a3be05e75",
    "78b8ed6519a1e888734e9c15d2f81bc121fe2d76ef16e58ffe0cb9fb58202fda",
    "378b09955146f68bf0a12dfc90bdac767b1b2870dd53c015e60d6efe3f762b0a",
    "bf5946c0a4127bf1b89d1b0bd2575cf8f644ac6636778c60374e5b249508caa4",
    "3fe0290a27d465c46a40ae371d2f244d1799393ef4eb19f40ced79aae32c294b",
    "9e89ef1930758e4c58bb57d325326737cd6e47343b4059d16b57beb1dc405801",
);

const TEST_RSA_PRIME_1_HEX: &str = concat!(
    "c17eb375335a0d9273286568173d37f8fb891264ea15f46b18650a87db599b72",
    "e23cfb049eba7f123336f8a101d8f5a88e24caa80cc67586a7f14821d56c1de4",
    "22b417eef91b04889353e45a9b9d7a01c1976037cfec5fc8e3074e5c74015549",
    "98aa764b1606180d6f70fee82a3c763ab158c22843f73087f6fa61f16714aaa1",
);

const TEST_RSA_PRIME_2_HEX: &str = concat!(
    "bd0683d4e3baecded866170258796b73ebec6dd93444f73dfb1862d050eb97c0",
    "05caa91c7b3def590efbbd9a4f965fce6ce3c8b6f9c53b9e3febd4b62df40bcb",
    "97b5fdc09dfe5814890349a89803101c05ca7faa0c2d0cf6ebed3aaac54b742f",
    "81937b145f629bfd2fe8343b00cec2070f38485b4d0786ed2f498cbcefa84c01",
);

const TEST_RSA_EXPONENT_1_HEX: &str = concat!(
    "907bf4b33a622f2a413553eb9316d279e811a59b973447abc4ae865b860e7646",
    "25eb952111097fa36e7cc8d1295901af185d1ebab7b765c0e41d0658c54e134f",
    "ec1e0095208bed29b2a17d2daf6fbad01ee7d32039f16e60ca2e057481e710f1",
    "80bf20cfd6a53c46a4058342876f587561423ed0e4576b74cb96919639fbb3a1",
);

const TEST_RSA_EXPONENT_2_HEX: &str = concat!(
    "aebe1c172d637b60533aa560b4bba27b2a8989cf36c3deb07cb4c17c84a216ca",
    "1c508a5f5b0b197e021cf4dd775fb337d87006f828148e15b04fea777429dcd1",
    "9c7150a0c52e00ed12f06822a44c8892ef43911b79601851182f5981cf1bfecf",
    "8000ffd2088fd7568af82578ba3969232f8dbf4e2ffa9a601fcbe58030292c01",
);

const TEST_RSA_COEFFICIENT_HEX: &str = concat!(
    "079296e5d2bd5d80f115834db7d9f1db697d5df0377020c52321b254fa47c2bd",
    "4ef9b2f4989ab7846fe1e36ef61eeaf67c4bb9fac18253aa5abe93946791480b",
    "5efc13e035414ec9556a74b83ff66c4cd6574be14edf5f501ceb8b27a7a59c96",
    "73e86a862b02b320adb8605e8d0fcc79e947464ff61f2ce08595fbccad0a2564",
);

fn hex_bytes(hex: &str) -> HResult<Vec<u8>> {
    hex::decode(hex).map_err(|e| HError::Default(format!("invalid test vector hex: {e}")))
}

pub fn test_rsa_modulus() -> HResult<Vec<u8>> {
    hex_bytes(TEST_RSA_MODULUS_HEX)
}

pub fn test_rsa_public_exponent() -> Vec<u8> {
    vec![0x01, 0x00, 0x01]
}

pub fn test_rsa_private_key_material() -> HResult<RsaPrivateKeyMaterial> {
    Ok(RsaPrivateKeyMaterial {
        modulus: hex_bytes(TEST_RSA_MODULUS_HEX)?,
        public_exponent: test_rsa_public_exponent(),
        private_exponent: Zeroizing::new(hex_bytes(TEST_RSA_PRIVATE_EXPONENT_HEX)?),
        prime_1: Zeroizing::new(hex_bytes(TEST_RSA_PRIME_1_HEX)?),
        prime_2: Zeroizing::new(hex_bytes(TEST_RSA_PRIME_2_HEX)?),
        exponent_1: Zeroizing::new(hex_bytes(TEST_RSA_EXPONENT_1_HEX)?),
        exponent_2: Zeroizing::new(hex_bytes(TEST_RSA_EXPONENT_2_HEX)?),
        coefficient: Zeroizing::new(hex_bytes(TEST_RSA_COEFFICIENT_HEX)?),
    })
}
