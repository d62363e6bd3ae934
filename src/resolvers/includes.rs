//! Include resolution
//!
//! Replaces every `<include href="..."/>` with the content of the referenced
//! fragment and embeds the rule referenced by every `<extends href="..."/>`.
//! Fragments are resolved recursively, relative to the fragment that
//! references them. Each resolution path keeps the chain of locations it
//! went through, so a fragment that includes one of its ancestors fails
//! instead of looping.

use tracing::debug;

use crate::documents::{xml_error, Element, Node};
use crate::error::{Error, Result, SchemaError, SchemaErrorKind};
use crate::limits::Limits;
use crate::loaders::Loader;
use crate::locations::Location;

/// A fetched schema fragment
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Root element of the fragment
    pub root: Element,
    /// Where the fragment was loaded from; base for its own hrefs
    pub location: Location,
}

/// Source of schema fragments referenced by `href`
pub trait FragmentFetcher {
    /// Fetch the fragment `href`, relative to `base`
    ///
    /// Missing fragments are reported as [`Error::NotFound`].
    fn fetch(&self, href: &str, base: Option<&Location>) -> Result<Fragment>;
}

impl FragmentFetcher for Loader {
    fn fetch(&self, href: &str, base: Option<&Location>) -> Result<Fragment> {
        let location = match base {
            Some(base) => base.join(href)?,
            None => Location::parse(href)?,
        };
        let text = self.load(&location)?;
        let root = Element::parse(&text, self.limits()).map_err(|e| xml_error(&location.as_str(), e))?;
        Ok(Fragment { root, location })
    }
}

/// Resolves includes against a fragment fetcher
pub struct IncludeResolver<'a> {
    fetcher: &'a dyn FragmentFetcher,
    limits: &'a Limits,
}

impl<'a> IncludeResolver<'a> {
    /// Create a resolver
    pub fn new(fetcher: &'a dyn FragmentFetcher, limits: &'a Limits) -> Self {
        Self { fetcher, limits }
    }

    /// Return a copy of `root` with all includes inlined
    pub fn resolve(&self, root: &Element, base: Option<&Location>) -> Result<Element> {
        let mut chain: Vec<String> = base.iter().map(|b| b.as_str()).collect();
        self.expand(root, base, &mut chain)
    }

    fn expand(
        &self,
        element: &Element,
        base: Option<&Location>,
        chain: &mut Vec<String>,
    ) -> Result<Element> {
        let mut out = Element {
            qname: element.qname.clone(),
            prefix: element.prefix.clone(),
            attributes: element.attributes.clone(),
            children: Vec::with_capacity(element.children.len()),
        };

        for child in &element.children {
            match child {
                Node::Element(e) if e.is_schematron("include") => {
                    let fragment = self.load(e, base, chain)?;
                    if fragment.is_schematron("schema") {
                        out.children.extend(fragment.children);
                    } else {
                        out.children.push(Node::Element(fragment));
                    }
                }
                Node::Element(e)
                    if e.is_schematron("extends")
                        && e.get_attribute("href").is_some()
                        && e.get_attribute("rule").is_none() =>
                {
                    let rule = self.load(e, base, chain)?;
                    if !rule.is_schematron("rule") {
                        return Err(Error::Schema(
                            SchemaError::new(
                                SchemaErrorKind::InvalidStructure,
                                "the fragment referenced by <extends href> must be a <rule>",
                            )
                            .with_element(e.describe()),
                        ));
                    }
                    let mut extends = e.clone();
                    extends.children = vec![Node::Element(rule)];
                    out.children.push(Node::Element(extends));
                }
                Node::Element(e) => out.children.push(Node::Element(self.expand(e, base, chain)?)),
                Node::Text(t) => out.children.push(Node::Text(t.clone())),
            }
        }

        Ok(out)
    }

    /// Fetch and expand the fragment referenced by `element`
    fn load(
        &self,
        element: &Element,
        base: Option<&Location>,
        chain: &mut Vec<String>,
    ) -> Result<Element> {
        let href = element.get_attribute("href").ok_or_else(|| {
            Error::Schema(
                SchemaError::new(SchemaErrorKind::InvalidStructure, "missing required attribute 'href'")
                    .with_element(element.describe()),
            )
        })?;

        self.limits.check_include_depth(chain.len() + 1)?;
        let fragment = self.fetcher.fetch(href, base)?;
        let key = fragment.location.as_str();

        if chain.contains(&key) {
            let mut cycle = chain.clone();
            cycle.push(key);
            return Err(Error::Schema(
                SchemaError::new(
                    SchemaErrorKind::CyclicInclude,
                    format!("'{}' includes itself: {}", href, cycle.join(" -> ")),
                )
                .with_element(element.describe()),
            ));
        }

        debug!(href, location = %fragment.location, "including fragment");
        chain.push(key);
        let expanded = self.expand(&fragment.root, Some(&fragment.location), chain);
        chain.pop();
        expanded
    }
}

/// Inline every include of `root`, fetching fragments with `fetcher`
pub fn resolve_includes(
    root: &Element,
    base: Option<&Location>,
    fetcher: &dyn FragmentFetcher,
    limits: &Limits,
) -> Result<Element> {
    IncludeResolver::new(fetcher, limits).resolve(root, base)
}
