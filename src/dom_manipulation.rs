use html5ever::tree_builder::TreeSink;
use markup5ever::QualName;
#[cfg(test)]
use scraper::Selector;
use scraper::node::Element;
use scraper::{Html, Node};
#[cfg(test)]
use crate::xml_utils::{html_attr_name, html_elem_name};

/// A change to the tree, collected while walking it and applied afterwards,
/// since the tree cannot be mutated while it is being iterated.
pub(crate) enum DomOperation<Handle> {
    /// Drops attribute `attr_name` of element `node_id`, if it has one.
    RemoveAttribute { node_id: Handle, attr_name: QualName },
    /// Sets attribute `attr_name` of element `node_id`, replacing any previous value in place.
    SetAttribute {
        node_id: Handle,
        attr_name: QualName,
        value: String,
    },
    /// Moves `child_id` to the end of `parent_id`'s children.
    AppendChild { parent_id: Handle, child_id: Handle },
    /// Detaches `node_id` together with its subtree.
    RemoveElement { node_id: Handle },
}

pub(crate) trait MutableDom: TreeSink {
    fn perform_operation(&mut self, op: DomOperation<Self::Handle>);

    /// Applies `ops` in the order they were collected.
    fn perform_operations(&mut self, ops: Vec<DomOperation<Self::Handle>>) {
        ops.into_iter().for_each(|op| self.perform_operation(op));
    }
}

trait ElementUpdate: TreeSink {
    /// Runs `update` on the element behind `node_id`. Text and other nodes are left alone.
    fn update_element<F: FnOnce(&mut Element)>(&mut self, node_id: Self::Handle, update: F);
}

impl ElementUpdate for Html {
    fn update_element<F: FnOnce(&mut Element)>(&mut self, node_id: Self::Handle, update: F) {
        if let Some(mut node) = self.tree.get_mut(node_id) {
            if let Node::Element(element) = node.value() {
                update(element);
            }
        }
    }
}

impl MutableDom for Html {
    fn perform_operation(&mut self, op: DomOperation<Self::Handle>) {
        match op {
            DomOperation::RemoveAttribute { node_id, attr_name } => {
                // shift_remove keeps the remaining attributes in source order.
                self.update_element(node_id, |element| {
                    element.attrs.shift_remove(&attr_name);
                });
            }
            DomOperation::SetAttribute { node_id, attr_name, value } => {
                self.update_element(node_id, |element| {
                    element.attrs.insert(attr_name, value.into());
                });
            }
            DomOperation::AppendChild { parent_id, child_id } => {
                if let Some(mut parent) = self.tree.get_mut(parent_id) {
                    parent.append_id(child_id);
                }
            }
            DomOperation::RemoveElement { node_id } => self.remove_from_parent(&node_id),
        }
    }
}

#[test]
fn test_remove_attribute() {
    let mut doc = Html::parse_fragment("<em title='foo'>Emphasis</em> <strong id='important' onclick='go()' data-test='other'>Bold</strong> <del title='bar'>Wrong</del>");
    let strong = doc.select(&Selector::parse("strong").unwrap()).next().expect("Strong tag not found.");

    doc.perform_operation(DomOperation::RemoveAttribute {
        node_id: strong.id(),
        attr_name: html_attr_name("onclick"),
    });

    assert_eq!(
        "<em title=\"foo\">Emphasis</em> <strong id=\"important\" data-test=\"other\">Bold</strong> <del title=\"bar\">Wrong</del>",
        doc.root_element().inner_html(),
    );
}

#[test]
fn test_set_attribute_existing() {
    let mut doc = Html::parse_fragment("<a id='Foo' href='/mywiki/pages/1.html'>Page</a>");
    let a = doc.select(&Selector::parse("a").unwrap()).next().expect("Link not found.");

    doc.perform_operation(DomOperation::SetAttribute {
        node_id: a.id(),
        attr_name: html_attr_name("href"),
        value: String::from("abc.xhtml"),
    });

    assert_eq!("<a id=\"Foo\" href=\"abc.xhtml\">Page</a>", doc.root_element().inner_html());
}

#[test]
fn test_append_created_child() {
    let mut doc = Html::parse_fragment("<div><p>Text</p></div>");
    let div = doc.select(&Selector::parse("div").unwrap()).next().expect("Div not found.").id();
    let hr = doc.create_element(html_elem_name("hr"), Vec::new(), Default::default());

    doc.perform_operation(DomOperation::AppendChild {
        parent_id: div,
        child_id: hr,
    });

    assert_eq!("<div><p>Text</p><hr></div>", doc.root_element().inner_html());
}

#[test]
fn test_remove_element() {
    let mut doc = Html::parse_fragment("<div><script>alert(1)</script><p>Kept</p></div>");
    let script = doc.select(&Selector::parse("script").unwrap()).next().expect("Script not found.").id();

    doc.perform_operation(DomOperation::RemoveElement { node_id: script });

    assert_eq!("<div><p>Kept</p></div>", doc.root_element().inner_html());
}
