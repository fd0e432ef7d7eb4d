#[macro_export]
macro_rules! assert_at_most_one_used_feature {
    ($($feature:literal),+ $(,)?) => {
        assert!(
            (0 $(+ cfg!(feature = $feature) as usize)+ ) <= 1,
            "At most one of the following features may be enabled: {}",
            [$($feature),+].join(", ")
        );
    };
}

fn main() {
    // NOTE: update when adding new device support!
    // Without a chip feature only the portable refresh core is built.
    assert_at_most_one_used_feature!("esp32");

    let target = std::env::var("TARGET").unwrap_or_default();

    #[cfg(feature = "esp32")]
    {
        assert!(
            target == "xtensa-esp32-none-elf",
            "feature esp32 does not match target {}",
            target
        );
        println!("cargo:rustc-cfg=esp32");
    }

    #[cfg(not(feature = "esp32"))]
    let _ = target;

    println!("cargo:rustc-check-cfg=cfg(esp32)");
}
