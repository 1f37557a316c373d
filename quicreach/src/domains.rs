/// Widely used domains that answer HTTP/3, probed when the hostname argument is `*`.
pub const TOP_DOMAINS: &[&str] = &[
    "google.com",
    "youtube.com",
    "facebook.com",
    "instagram.com",
    "whatsapp.com",
    "gmail.com",
    "google.co.uk",
    "googleapis.com",
    "gstatic.com",
    "cloudflare.com",
    "cloudflare-quic.com",
    "blog.cloudflare.com",
    "discord.com",
    "microsoft.com",
    "bing.com",
    "outlook.com",
    "office.com",
    "linkedin.com",
    "github.com",
    "amazon.com",
    "tiktok.com",
    "snapchat.com",
    "pinterest.com",
    "reddit.com",
    "wikipedia.org",
    "fastly.com",
    "akamai.com",
    "litespeedtech.com",
    "nginx.org",
    "quic.nginx.org",
    "shopify.com",
    "medium.com",
    "dropbox.com",
    "cdnjs.com",
    "jsdelivr.com",
    "unpkg.com",
    "vimeo.com",
    "wordpress.com",
    "yahoo.com",
    "msn.com",
];

/// Expand the hostname argument: `*` means the built-in list, otherwise a comma-separated list.
pub fn expand_hosts(arg: &str) -> Vec<String> {
    if arg.trim() == "*" {
        TOP_DOMAINS.iter().map(|d| d.to_string()).collect()
    } else {
        reach_core::split_hosts(arg)
    }
}
