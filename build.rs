fn main() {
    println!("cargo:rerun-if-env-changed=OTA_SERVER_URL");
    println!("cargo:rerun-if-env-changed=OTA_FIRMWARE_LABEL");
    println!("cargo:rerun-if-env-changed=OTA_WIFI_SSID");
    println!("cargo:rerun-if-env-changed=OTA_WIFI_PASS");

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
