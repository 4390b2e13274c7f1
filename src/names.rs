//! Seeded provider metadata.
//!
//! The builder knows display names and the cloud-kind set for a handful of
//! well-known provider keys. Unknown keys fall back to name=key, kind=ISP.

/// Display name for a known provider key.
pub(crate) fn provider_display_name(key: &str) -> Option<&'static str> {
    let name = match key {
        "chinatelecom" => "中国电信",
        "chinaunicom" => "中国联通",
        "chinamobile" => "中国移动",
        "drpeng" => "鹏博士",
        "cernet" => "中国教育网",
        "cstnet" => "中国科技网",
        "aliyun" => "阿里云",
        "tencent" => "腾讯云",
        "cloudflare" => "Cloudflare",
        "huawei" => "华为云",
        "microsoft" => "Microsoft",
        "bytedance" => "字节跳动",
        "volcengine" => "火山引擎",
        "googlecloud" => "Google Cloud",
        "digitalocean" => "DigitalOcean",
        _ => return None,
    };
    Some(name)
}

/// Whether a provider key is classified as a cloud vendor.
pub(crate) fn is_cloud_vendor(key: &str) -> bool {
    matches!(
        key,
        "aliyun"
            | "tencent"
            | "huawei"
            | "microsoft"
            | "cloudflare"
            | "googlecloud"
            | "digitalocean"
            | "bytedance"
            | "volcengine"
    )
}
