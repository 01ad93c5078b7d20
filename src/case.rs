//! Identifier case conversion used for generated relation, key and index names.

/// Split an identifier into words on separators and lower-to-upper case boundaries.
/// e.g. "BlogPost" -> ["Blog", "Post"], "blog_post" -> ["blog", "post"]
fn words(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut prev_lower = false;
    for c in s.chars() {
        if !c.is_alphanumeric() {
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !cur.is_empty() {
            out.push(std::mem::take(&mut cur));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        cur.push(c);
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// Convert any identifier to camelCase.
/// e.g. "BlogPost" -> "blogPost", "blog_post" -> "blogPost", "Author" -> "author"
pub fn camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, w) in words(s).iter().enumerate() {
        let lower = w.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
            continue;
        }
        let mut chars = lower.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Lowercase snake identifier safe for index names: "protean.orm.field" -> "protean_orm_field".
pub fn slug(s: &str) -> String {
    words(s)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_cases_model_names() {
        assert_eq!(camel_case("BlogPost"), "blogPost");
        assert_eq!(camel_case("blog_post"), "blogPost");
        assert_eq!(camel_case("Blog Post"), "blogPost");
        assert_eq!(camel_case("author"), "author");
        assert_eq!(camel_case("Author2Book"), "author2Book");
    }

    #[test]
    fn slugs_namespaces() {
        assert_eq!(slug("protean.orm.field"), "protean_orm_field");
        assert_eq!(slug("modelId"), "model_id");
        assert_eq!(slug("shop.Customer"), "shop_customer");
    }
}
