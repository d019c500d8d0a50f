use std::collections::HashMap;
use std::fmt::Error;

use coap_lite::link_format::{
    LinkFormatWrite, LINK_ATTR_CONTENT_FORMAT, LINK_ATTR_OBSERVABLE,
};

use crate::app::resource_tree::{ResourceHandle, ResourceTree};

/// Value of a single CoRE Link attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAttributeValue {
    Quoted(String),
    Number(u32),
    Flag,
}

impl LinkAttributeValue {
    fn format_for_comparison(&self) -> String {
        match self {
            LinkAttributeValue::Quoted(value) => value.clone(),
            LinkAttributeValue::Number(value) => value.to_string(),
            LinkAttributeValue::Flag => String::new(),
        }
    }
}

impl From<&str> for LinkAttributeValue {
    fn from(value: &str) -> Self {
        LinkAttributeValue::Quoted(value.to_string())
    }
}

impl From<u32> for LinkAttributeValue {
    fn from(value: u32) -> Self {
        LinkAttributeValue::Number(value)
    }
}

impl From<()> for LinkAttributeValue {
    fn from(_: ()) -> Self {
        LinkAttributeValue::Flag
    }
}

#[derive(Default, Debug, Clone)]
pub struct CoreLink {
    path: String,
    attributes: Vec<(&'static str, LinkAttributeValue)>,
}

impl CoreLink {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            attributes: Vec::new(),
        }
    }

    /// Link for a resource in `tree`, or `None` if it shouldn't be advertised.  `ct` lists
    /// every supported Content-Format and `obs` marks observable resources.
    pub fn for_resource<Endpoint>(
        tree: &ResourceTree<Endpoint>,
        handle: ResourceHandle,
    ) -> Option<Self> {
        let resource = tree.get(handle)?;
        if !resource.is_discoverable() {
            return None;
        }
        let mut link = CoreLink::new(&tree.path_of(handle));
        for (key, value) in resource.attributes() {
            link.attr(key, value.clone());
        }
        let formats: Vec<_> = resource.content_types().iter().map(|ct| ct.number()).collect();
        match formats.as_slice() {
            [] => {}
            [single] => link.attr(LINK_ATTR_CONTENT_FORMAT, u32::from(*single)),
            many => {
                let joined: Vec<_> = many.iter().map(u16::to_string).collect();
                link.attr(LINK_ATTR_CONTENT_FORMAT, joined.join(" ").as_str());
            }
        }
        if resource.is_observable() {
            link.attr(LINK_ATTR_OBSERVABLE, ());
        }
        Some(link)
    }

    pub fn attr(&mut self, key: &'static str, value: impl Into<LinkAttributeValue>) {
        self.attributes.push((key, value.into()));
    }

    pub fn format_single_link(&self) -> Result<String, Error> {
        let mut buf = String::new();
        let mut write = LinkFormatWrite::new(&mut buf);
        write = self.write_link(write)?;
        write.finish()?;
        Ok(buf)
    }

    fn write_link<'a>(
        &self,
        mut write: LinkFormatWrite<'a, String>,
    ) -> Result<LinkFormatWrite<'a, String>, Error> {
        let mut link = write.link(&self.path);
        for (key, value) in &self.attributes {
            link = match value {
                LinkAttributeValue::Quoted(v) => link.attr_quoted(key, v),
                LinkAttributeValue::Number(n) => link.attr_u32(key, *n),
                LinkAttributeValue::Flag => link.attr(key, ""),
            };
        }
        link.finish().map(|_| write)
    }
}

/// A formatted link plus the attribute values queries are matched against.
#[derive(Debug, Clone)]
pub struct DiscoverableResource {
    pub link_str: String,
    pub attributes_as_string: HashMap<&'static str, String>,
}

impl TryFrom<CoreLink> for DiscoverableResource {
    type Error = Error;

    fn try_from(src: CoreLink) -> Result<Self, Self::Error> {
        let link_str = src.format_single_link()?;
        let attributes_as_string: HashMap<_, _> = src
            .attributes
            .into_iter()
            .map(|(k, v)| (k, v.format_for_comparison()))
            .collect();
        Ok(Self {
            link_str,
            attributes_as_string,
        })
    }
}

#[cfg(test)]
mod tests {
    use coap_lite::link_format::{
        LinkFormatWrite, LINK_ATTR_CONTENT_FORMAT, LINK_ATTR_OBSERVABLE, LINK_ATTR_RESOURCE_TYPE,
    };

    use super::*;
    use crate::app::content_type::ContentType;
    use crate::app::permissions::Permissions;
    use crate::app::resource_builder::ResourceBuilder;
    use crate::app::test_util::{TestEndpoint, TestLed};

    #[test]
    fn test_multiple() {
        let mut a = CoreLink::new("/a");
        a.attr(LINK_ATTR_RESOURCE_TYPE, "a");
        a.attr(LINK_ATTR_CONTENT_FORMAT, 50u32);

        let mut b = CoreLink::new("/b/whatever");
        b.attr(LINK_ATTR_OBSERVABLE, ());

        let out = format_links(vec![a, b]);

        assert_eq!(out, r#"</a>;rt="a";ct=50,</b/whatever>;obs="#);
    }

    #[test]
    fn test_for_resource() {
        let mut tree = ResourceTree::<TestEndpoint>::new();
        let lights = tree.create(ResourceBuilder::new("lights"));
        let led3 = tree.create(
            ResourceBuilder::new("led3")
                .permissions(Permissions::GET | Permissions::OBSERVE)
                .content_types(ContentType::Json | ContentType::TextPlain)
                .link_attr(LINK_ATTR_RESOURCE_TYPE, "light")
                .handler(TestLed::default()),
        );
        let hidden = tree.create(
            ResourceBuilder::new("hidden")
                .not_discoverable()
                .handler(TestLed::default()),
        );
        let root = tree.root();
        tree.add_child(root, lights).unwrap();
        tree.add_child(lights, led3).unwrap();
        tree.add_child(root, hidden).unwrap();

        // Path-only nodes have no handler and aren't advertised.
        assert!(CoreLink::for_resource(&tree, lights).is_none());
        assert!(CoreLink::for_resource(&tree, hidden).is_none());

        let link = CoreLink::for_resource(&tree, led3).unwrap();
        let discoverable = DiscoverableResource::try_from(link).unwrap();
        assert_eq!(
            discoverable.link_str,
            r#"</lights/led3>;rt="light";ct="0 50";obs="#
        );
        assert_eq!(
            discoverable.attributes_as_string.get(LINK_ATTR_RESOURCE_TYPE),
            Some(&"light".to_string())
        );
    }

    fn format_links(links: Vec<CoreLink>) -> String {
        let mut out = String::new();
        let mut write = LinkFormatWrite::new(&mut out);

        for link in links {
            write = link.write_link(write).unwrap();
        }

        out
    }
}
